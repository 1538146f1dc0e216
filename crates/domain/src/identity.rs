//! The seam through which an authenticated identity enters the core.

use common::Identity;

use crate::DomainError;

/// Resolves the caller's identity from a request carrier.
///
/// The carrier is whatever the boundary layer has at hand (headers, a session,
/// a test fixture). Resolution never fails loudly: an absent or unreadable
/// identity is `None`, and operations that need one reject it with
/// [`DomainError::Unauthorized`].
pub trait IdentityResolver<C: ?Sized>: Send + Sync {
    fn resolve(&self, carrier: &C) -> Option<Identity>;
}

impl<C: ?Sized, F> IdentityResolver<C> for F
where
    F: Fn(&C) -> Option<Identity> + Send + Sync,
{
    fn resolve(&self, carrier: &C) -> Option<Identity> {
        self(carrier)
    }
}

/// Turns an absent identity into an `Unauthorized` error.
pub fn require_identity(identity: Option<Identity>) -> Result<Identity, DomainError> {
    identity.ok_or_else(DomainError::unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::collections::HashMap;

    #[test]
    fn closures_resolve_identities() {
        let sessions = HashMap::from([("abc", Identity::customer(7))]);
        let resolver = |token: &str| sessions.get(token).copied();

        assert_eq!(
            IdentityResolver::<str>::resolve(&resolver, "abc"),
            Some(Identity::customer(7))
        );
        assert_eq!(IdentityResolver::<str>::resolve(&resolver, "nope"), None);
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let err = require_identity(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(require_identity(Some(Identity::admin(1))).unwrap(), Identity::admin(1));
    }
}
