/// Anonymous identity: a random uid plus a friendly display name
use crate::chat_types::Author;
use crate::error::Result;
use futures_util::future::{BoxFuture, FutureExt};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

const ADJECTIVES: &[&str] = &["Swift", "Silent", "Bright", "Cool", "Sharp", "Wise"];
const ANIMALS: &[&str] = &["Fox", "Eagle", "Wolf", "Dolphin", "Tiger", "Falcon"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
}

impl Identity {
    pub fn author(&self) -> Author {
        Author {
            id: self.uid.clone(),
            name: self.display_name.clone(),
        }
    }
}

/// Identity collaborator: resolves (or issues) the local user's identity
pub trait IdentityProvider: Send + Sync {
    fn ensure_identity(&self) -> BoxFuture<'_, Result<Identity>>;
}

/// Generate a display name like "Silent Falcon"
pub fn random_display_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Quiet");
    let animal = ANIMALS.choose(rng).copied().unwrap_or("Owl");
    format!("{} {}", adjective, animal)
}

/// Issues one identity per process and hands the same one out afterwards
pub struct AnonymousIdentity {
    preferred_name: Option<String>,
    issued: OnceCell<Identity>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        Self {
            preferred_name: None,
            issued: OnceCell::new(),
        }
    }

    /// Use a fixed display name instead of a generated one
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            preferred_name: Some(name.into()),
            issued: OnceCell::new(),
        }
    }

    fn issue(&self) -> Identity {
        let display_name = self
            .preferred_name
            .clone()
            .unwrap_or_else(|| random_display_name(&mut rand::thread_rng()));
        Identity {
            uid: Uuid::new_v4().to_string(),
            display_name,
        }
    }
}

impl Default for AnonymousIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn ensure_identity(&self) -> BoxFuture<'_, Result<Identity>> {
        async move {
            let identity = self
                .issued
                .get_or_init(|| async { self.issue() })
                .await;
            Ok(identity.clone())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_display_name_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = random_display_name(&mut rng);
        let parts: Vec<_> = name.split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let provider = AnonymousIdentity::new();
        let first = provider.ensure_identity().await.unwrap();
        let second = provider.ensure_identity().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_preferred_name() {
        let provider = AnonymousIdentity::with_name("Night Owl");
        let identity = provider.ensure_identity().await.unwrap();
        assert_eq!(identity.display_name, "Night Owl");
        assert_eq!(identity.author().id, identity.uid);
    }
}
