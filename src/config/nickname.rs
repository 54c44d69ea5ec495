//! Random username generator.
//!
//! Produces usernames in the format `AdjectiveNounNN` (e.g. `MistyHeron42`) for
//! first runs, before the user has picked or registered a name.

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Quiet", "Amber", "Drowsy", "Misty", "Paper", "Velvet", "Idle", "Gentle", "Copper", "Hazel",
    "Windy", "Sleepy", "Little", "Wandering", "Pale", "Early", "Lazy", "Mossy", "Dusky", "Tidal",
];

const NOUNS: &[&str] = &[
    "Lantern", "Heron", "Teapot", "Comet", "Willow", "Finch", "Marten", "Pebble", "Kettle", "Badger",
    "Thistle", "Otter", "Minnow", "Sparrow", "Acorn", "Lark", "Ferret", "Clover", "Wren", "Puffin",
];

/// Lichat rejects names longer than this.
const MAX_USERNAME: usize = 32;

/// Generate a random username like `MistyHeron42`.
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    let mut name = format!("{}{}{}", adj, noun, num);
    name.truncate(MAX_USERNAME);
    name
}
