//! Guest identifiers.
//!
//! The identifier is passed to the guest as `host=<name>` on the kernel
//! command line; the guest advertises it when it requests a DHCP lease, and
//! that is how its address is found again.

use rand_core::{OsRng, RngCore};

use crate::error::LinuxError;

const CAT_NAMES: &[&str] = &[
    "Angel", "Bandit", "Bella", "Boots", "Buster", "Callie", "Casper", "Charlie", "Chester",
    "Chloe", "Cleo", "Coco", "Cookie", "Daisy", "Dusty", "Felix", "Garfield", "Ginger", "Gizmo",
    "Gracie", "Jasper", "Kiki", "Kitty", "Leo", "Lily", "Loki", "Lucky", "Lucy", "Luna", "Max",
    "Midnight", "Milo", "Misty", "Mittens", "Molly", "Muffin", "Nala", "Oliver", "Oreo", "Oscar",
    "Patches", "Peanut", "Pepper", "Precious", "Princess", "Pumpkin", "Rocky", "Sam", "Sassy",
    "Shadow", "Simba", "Smokey", "Socks", "Sophie", "Sox", "Sunny", "Tiger", "Tigger", "Toby",
    "Tom", "Whiskers", "Zoe", "Miss Kitty", "Baby Girl",
];

const MAX_LEN: usize = 63;

/// Four random cat names, lowercased and joined with hyphens.
pub fn generate() -> String {
    let words: Vec<&str> = (0..4)
        .map(|_| CAT_NAMES[(OsRng.next_u32() as usize) % CAT_NAMES.len()])
        .collect();
    normalize(&words.join("-"))
}

fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Check a caller-supplied identifier is usable as a hostname label and a
/// file's contents.
pub fn validate(name: &str) -> Result<(), LinuxError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(LinuxError::Validation {
            message: format!(
                "hostname must match [a-z0-9-]+, at most {MAX_LEN} chars, \
                 no leading or trailing hyphen (got '{name}')"
            ),
        });
    }
    Ok(())
}
