use uuid::Uuid;

/// Collision-resistant identifier prefixed with the collection tag,
/// e.g. `cli-01920f3c-...`.
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}
