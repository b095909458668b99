//! Cuisine vocabulary: maps provider type tags to cuisine labels and groups
//! labels into the filter-bar categories.

use serde::Serialize;

/// Label used when no tag maps to a cuisine.
pub const DEFAULT_CUISINE: &str = "Restaurant";

/// Tag fragment → cuisine label. The longest fragment found in any tag wins,
/// so "thai_restaurant" maps through "thai" and "ice_cream_shop" through
/// "ice_cream" rather than "cream". Generic fragments such as "restaurant"
/// must stay out of this table.
const CUISINE_TABLE: &[(&str, &str)] = &[
    ("italian", "Italian"),
    ("pizza", "Italian"),
    ("pasta", "Italian"),
    ("hamburger", "American"),
    ("burger", "American"),
    ("american", "American"),
    ("diner", "American"),
    ("japanese", "Japanese"),
    ("sushi", "Japanese"),
    ("ramen", "Japanese"),
    ("chinese", "Chinese"),
    ("dim_sum", "Chinese"),
    ("thai", "Thai"),
    ("korean", "Korean"),
    ("vietnamese", "Vietnamese"),
    ("pho", "Vietnamese"),
    ("indian", "Indian"),
    ("mexican", "Mexican"),
    ("taco", "Mexican"),
    ("mediterranean", "Mediterranean"),
    ("greek", "Mediterranean"),
    ("middle_eastern", "Mediterranean"),
    ("lebanese", "Mediterranean"),
    ("seafood", "Seafood"),
    ("fish", "Seafood"),
    ("steak_house", "Steakhouse"),
    ("steakhouse", "Steakhouse"),
    ("barbecue", "BBQ"),
    ("bbq", "BBQ"),
    ("cafe", "Cafe"),
    ("coffee", "Cafe"),
    ("bakery", "Desserts"),
    ("dessert", "Desserts"),
    ("ice_cream", "Desserts"),
    ("vegetarian", "Vegetarian"),
    ("vegan", "Vegetarian"),
    ("salad", "Salad"),
    ("deli", "Deli"),
    ("sandwich", "Deli"),
];

/// Map a venue's type tags (and name, as a last resort) to a cuisine label.
pub fn cuisine_for_tags<S: AsRef<str>>(tags: &[S], name: &str) -> &'static str {
    best_match(tags.iter().map(|t| t.as_ref().to_lowercase()))
        .or_else(|| {
            let name = name.to_lowercase().replace(' ', "_");
            best_match(std::iter::once(name))
        })
        .unwrap_or(DEFAULT_CUISINE)
}

fn best_match(haystacks: impl Iterator<Item = String>) -> Option<&'static str> {
    let mut best: Option<(&'static str, usize)> = None;
    for hay in haystacks {
        for &(fragment, label) in CUISINE_TABLE {
            if hay.contains(fragment) && best.map_or(true, |(_, len)| fragment.len() > len) {
                best = Some((label, fragment.len()));
            }
        }
    }
    best.map(|(label, _)| label)
}

/// One filter-bar category.
#[derive(Debug, Clone, Serialize)]
pub struct CuisineCategory {
    pub id: &'static str,
    pub label: &'static str,
    pub emoji: &'static str,
    /// Cuisine labels this category covers.
    pub cuisines: &'static [&'static str],
}

const CATEGORIES: &[CuisineCategory] = &[
    CuisineCategory { id: "all", label: "All", emoji: "", cuisines: &[] },
    CuisineCategory { id: "italian", label: "Italian", emoji: "\u{1F355}", cuisines: &["Italian"] },
    CuisineCategory { id: "burgers", label: "Burgers", emoji: "\u{1F354}", cuisines: &["American"] },
    CuisineCategory {
        id: "asian",
        label: "Asian",
        emoji: "\u{1F35C}",
        cuisines: &["Chinese", "Japanese", "Thai", "Korean", "Vietnamese"],
    },
    CuisineCategory { id: "healthy", label: "Healthy", emoji: "\u{1F957}", cuisines: &["Vegetarian", "Salad"] },
    CuisineCategory { id: "mexican", label: "Mexican", emoji: "\u{1F32E}", cuisines: &["Mexican"] },
    CuisineCategory { id: "bbq", label: "BBQ", emoji: "\u{1F357}", cuisines: &["BBQ", "Steakhouse"] },
    CuisineCategory { id: "cafes", label: "Cafes", emoji: "\u{2615}", cuisines: &["Cafe"] },
    CuisineCategory { id: "indian", label: "Indian", emoji: "\u{1F35B}", cuisines: &["Indian"] },
    CuisineCategory { id: "chinese", label: "Chinese", emoji: "\u{1F961}", cuisines: &["Chinese"] },
    CuisineCategory { id: "japanese", label: "Japanese", emoji: "\u{1F371}", cuisines: &["Japanese"] },
    CuisineCategory { id: "thai", label: "Thai", emoji: "\u{1F372}", cuisines: &["Thai"] },
    CuisineCategory {
        id: "mediterranean",
        label: "Mediterranean",
        emoji: "\u{1FAD2}",
        cuisines: &["Mediterranean"],
    },
    CuisineCategory { id: "seafood", label: "Seafood", emoji: "\u{1F990}", cuisines: &["Seafood"] },
    CuisineCategory { id: "desserts", label: "Desserts", emoji: "\u{1F370}", cuisines: &["Desserts"] },
];

/// The filter-bar categories, "all" first.
pub fn cuisine_categories() -> &'static [CuisineCategory] {
    CATEGORIES
}

/// Whether a venue with cuisine label `cuisine` belongs to category `id`.
/// Unknown ids match a cuisine label of the same name.
pub fn category_includes(id: &str, cuisine: &str) -> bool {
    let id = id.to_lowercase();
    if id == "all" {
        return true;
    }
    match CATEGORIES.iter().find(|c| c.id == id) {
        Some(category) => category.cuisines.iter().any(|c| c.eq_ignore_ascii_case(cuisine)),
        None => cuisine.eq_ignore_ascii_case(&id),
    }
}
