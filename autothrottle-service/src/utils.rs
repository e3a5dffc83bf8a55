/// Join path components with "/" separators.
pub(crate) fn join_path(parts: &[&str]) -> String {
    parts.join("/")
}
