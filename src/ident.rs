//! Column names and column paths
//! ------------------------------
//! A column path `Link::SuperLink::C` names a value reached by following link
//! columns hop by hop. Each hop is one segment; the last segment is the value column.

pub const PATH_SEPARATOR: &str = "::";

/// True when the name denotes a multi-hop path rather than a plain column.
pub fn is_path(name: &str) -> bool {
    name.contains(PATH_SEPARATOR)
}

/// Split a column name into its path segments. Empty segments are dropped,
/// so `"A::::B"` and `"A::B"` name the same path.
pub fn split_path(name: &str) -> Vec<String> {
    name.split(PATH_SEPARATOR)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn join_path<S: AsRef<str>>(segments: &[S]) -> String {
    segments.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(PATH_SEPARATOR)
}

/// The remainder of a path after its first hop, in joined form.
pub fn path_tail<S: AsRef<str>>(segments: &[S]) -> Option<String> {
    if segments.len() < 2 { return None; }
    Some(join_path(&segments[1..]))
}
