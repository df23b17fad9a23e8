//! Directory walking between a repository base and a resource

use url::Url;

/// Directories between `base` and `target`, innermost first.
///
/// The walk starts at the directory containing `target` and climbs one level
/// at a time. It stops before the base itself, as soon as a directory falls
/// outside the base, or at the root path. Without a base the walk only stops
/// at the root.
pub fn directories_between(base: Option<&Url>, target: &Url) -> Vec<Url> {
    let mut dirs = Vec::new();
    let mut current = target.join(".").ok();

    while let Some(dir) = current {
        if is_boundary(base, &dir) {
            break;
        }
        current = dir.join("..").ok();
        dirs.push(dir);
    }
    dirs
}

fn is_boundary(base: Option<&Url>, dir: &Url) -> bool {
    if dir.path().is_empty() || dir.path() == "/" {
        return true;
    }
    match base {
        Some(base) => match base.make_relative(dir) {
            // Same directory as the base, or reachable only by climbing out.
            Some(relative) => relative.is_empty() || relative.starts_with(".."),
            // Different scheme or authority.
            None => true,
        },
        None => false,
    }
}
