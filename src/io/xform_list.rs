//! Plain-text lists of transformations.
//!
//! Each entry is a path, optionally preceded by an inversion marker.
//! Text following a `#` is ignored.
use crate::ChainEntry;

pub const INVERSE_MARKERS: [&str; 2] = ["--inverse", "-i"];

pub(crate) fn is_inverse_marker(token: &str) -> bool {
    INVERSE_MARKERS.contains(&token)
}

/// Pair each specifier with the marker (if any) which precedes it.
pub(crate) fn parse_tokens<'a>(
    tokens: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<ChainEntry>, String> {
    let mut entries = Vec::new();
    let mut inverse = false;
    for token in tokens {
        if is_inverse_marker(token) {
            if inverse {
                return Err(format!("repeated inversion marker `{token}`"));
            }
            inverse = true;
            continue;
        }
        entries.push(ChainEntry::new(token, inverse));
        inverse = false;
    }
    if inverse {
        return Err("inversion marker is not followed by a transformation".into());
    }
    Ok(entries)
}

pub(crate) fn parse_list(text: &str) -> Result<Vec<ChainEntry>, String> {
    parse_tokens(
        text.lines()
            .map(|line| line.split_once('#').map_or(line, |(content, _)| content))
            .flat_map(str::split_whitespace),
    )
}
