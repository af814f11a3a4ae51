//! Access control for commands and ports

/// Grants every permission
pub const WILDCARD: &str = "*";

/// Permission required to invoke ports directly
pub const WRITE: &str = "write";

/// Check `permission` against an ACL
///
/// An empty ACL grants nothing; `*` grants everything.
pub fn check_acl<S: AsRef<str>>(acl: &[S], permission: &str) -> bool {
    let permission = permission.trim();
    if permission.is_empty() {
        return false;
    }
    acl.iter().map(AsRef::as_ref).any(|entry| {
        entry == WILDCARD || entry.eq_ignore_ascii_case(permission)
    })
}
