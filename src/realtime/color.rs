/// Cursor colors handed out to collaborators
pub const PALETTE: [&str; 12] = [
    "#EF4444", "#F97316", "#F59E0B", "#84CC16", "#10B981", "#14B8A6",
    "#06B6D4", "#3B82F6", "#6366F1", "#8B5CF6", "#D946EF", "#EC4899",
];

/// Deterministic color for a user id.
///
/// Hashes UTF-16 code units with `c + ((h << 5) - h)` in wrapping 32-bit
/// signed arithmetic, then indexes the palette by `|h| mod len`. The same id
/// always maps to the same color, with no coordination between clients.
pub fn color_for(user_id: &str) -> &'static str {
    let hash = user_id.encode_utf16().fold(0i32, |hash, unit| {
        i32::from(unit).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash))
    });
    PALETTE[hash.unsigned_abs() as usize % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_same_color() {
        for id in ["", "a", "user-123", "0f8fad5b-d9cb-469f-a165-70867728950e", "Zoë"] {
            assert_eq!(color_for(id), color_for(id));
        }
    }

    #[test]
    fn empty_id_maps_to_first_entry() {
        assert_eq!(color_for(""), PALETTE[0]);
    }

    #[test]
    fn known_hashes() {
        // "a" hashes to 97, "ab" to 97 * 31 + 98 = 3105
        assert_eq!(color_for("a"), PALETTE[97 % PALETTE.len()]);
        assert_eq!(color_for("ab"), PALETTE[3105 % PALETTE.len()]);
    }

    #[test]
    fn long_ids_wrap_without_panicking() {
        let id = "x".repeat(10_000);
        assert!(PALETTE.contains(&color_for(&id)));
    }

    #[test]
    fn ids_spread_over_the_palette() {
        let used: std::collections::HashSet<_> =
            (0..200).map(|i| color_for(&format!("user-{i}"))).collect();
        assert!(used.len() > PALETTE.len() / 2);
    }
}
