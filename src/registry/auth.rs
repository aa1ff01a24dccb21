//! Identity (always-accept in v1 — a reverse proxy is the real enforcer) and
//! capability issuance: scoped bearer tokens and the permission predicates
//! the HTTP surface re-checks on every push/pull step.

use std::{
    collections::{HashMap, HashSet},
    str,
    sync::Mutex,
};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use rand::RngCore;
use sec::Secret;

use super::{meta_store::ImageId, www_authenticate};

/// Read vs. write capability, frozen into a token at issuance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Mode {
    Read,
    Write,
}

pub(crate) type Token = String;

/// Credentials lifted off the wire, not yet checked against anything.
#[derive(Debug)]
pub(crate) struct UnverifiedCredentials {
    pub(crate) username: String,
    #[allow(dead_code)]
    pub(crate) password: Secret<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UnverifiedCredentials {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        let (_unparsed, basic) = www_authenticate::basic_auth_response(auth_header.as_bytes())
            .map_err(|_| StatusCode::BAD_REQUEST)?;

        Ok(UnverifiedCredentials {
            username: str::from_utf8(&basic.username)
                .map_err(|_| StatusCode::BAD_REQUEST)?
                .to_owned(),
            password: Secret::new(
                str::from_utf8(&basic.password)
                    .map_err(|_| StatusCode::BAD_REQUEST)?
                    .to_owned(),
            ),
        })
    }
}

/// A bearer token lifted off an `Authorization: Token ...` header. Not yet
/// checked against any specific permission — handlers pair it with whichever
/// `HasPerm*` predicate applies to their operation.
#[derive(Debug, Clone)]
pub(crate) struct BearerToken(pub(crate) Token);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let (_, signature) = www_authenticate::token_signature(header.as_bytes())
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(BearerToken(signature))
    }
}

/// The capability a token was minted with: frozen at issuance, never looked
/// up against current repository membership afterwards.
#[derive(Debug, Clone)]
struct TokenPerm {
    namespace: String,
    repository: String,
    images: HashSet<ImageId>,
    mode: Mode,
}

fn generate_token() -> Token {
    let mut bytes = [0u8; 16]; // 128 bits, per the spec's "opaque random string (>= 128 bits)".
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
pub(crate) trait Authenticator: Send + Sync {
    /// Always accepts — the reverse proxy is the real identity enforcer.
    async fn authenticate(&self, user: &str, pass: &str) -> bool;

    /// Grants iff `user == namespace`. Mints a fresh token bound to exactly
    /// the supplied `(namespace, repository, images, mode)` on success.
    async fn authorize(
        &self,
        user: &str,
        pass: &str,
        namespace: &str,
        repository: &str,
        image_ids: &[ImageId],
        mode: Mode,
    ) -> Option<Token>;

    async fn has_perm_push_image(&self, token: &str, image_id: &str) -> bool;
    async fn has_perm_pull_image(&self, token: &str, image_id: &str) -> bool;
    async fn has_perm_push_tag(
        &self,
        token: &str,
        namespace: &str,
        repository: &str,
        image_id: &str,
        tag: &str,
    ) -> bool;
    async fn has_perm_pull_tag(&self, token: &str, namespace: &str, repository: &str) -> bool;
    async fn has_perm_pull_tags(&self, token: &str, namespace: &str, repository: &str) -> bool;
    async fn has_perm_push_checksums(
        &self,
        token: &str,
        namespace: &str,
        repository: &str,
    ) -> bool;
}

/// Process-lifetime token table, single mutex, never evicted — matching the
/// "never evict" reference behavior called out in the design notes. A
/// production deployment would back this with a bounded LRU instead.
#[derive(Debug, Default)]
pub(crate) struct LocalAuthenticator {
    tokens: Mutex<HashMap<Token, TokenPerm>>,
}

impl LocalAuthenticator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, token: &str) -> Option<TokenPerm> {
        self.tokens.lock().unwrap().get(token).cloned()
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn authenticate(&self, _user: &str, _pass: &str) -> bool {
        true
    }

    async fn authorize(
        &self,
        user: &str,
        _pass: &str,
        namespace: &str,
        repository: &str,
        image_ids: &[ImageId],
        mode: Mode,
    ) -> Option<Token> {
        if user != namespace {
            return None;
        }

        let token = generate_token();
        let perm = TokenPerm {
            namespace: namespace.to_owned(),
            repository: repository.to_owned(),
            images: image_ids.iter().cloned().collect(),
            mode,
        };
        self.tokens.lock().unwrap().insert(token.clone(), perm);
        Some(token)
    }

    async fn has_perm_push_image(&self, token: &str, image_id: &str) -> bool {
        let Some(perm) = self.lookup(token) else {
            return false;
        };
        perm.mode == Mode::Write && perm.images.contains(image_id)
    }

    async fn has_perm_pull_image(&self, token: &str, image_id: &str) -> bool {
        let Some(perm) = self.lookup(token) else {
            return false;
        };
        perm.mode == Mode::Read && perm.images.contains(image_id)
    }

    async fn has_perm_push_tag(
        &self,
        token: &str,
        namespace: &str,
        repository: &str,
        image_id: &str,
        _tag: &str,
    ) -> bool {
        let Some(perm) = self.lookup(token) else {
            return false;
        };
        perm.mode == Mode::Write
            && perm.namespace == namespace
            && perm.repository == repository
            && perm.images.contains(image_id)
    }

    async fn has_perm_pull_tag(&self, token: &str, namespace: &str, repository: &str) -> bool {
        let Some(perm) = self.lookup(token) else {
            return false;
        };
        perm.mode == Mode::Read && perm.namespace == namespace && perm.repository == repository
    }

    async fn has_perm_pull_tags(&self, token: &str, namespace: &str, repository: &str) -> bool {
        self.has_perm_pull_tag(token, namespace, repository).await
    }

    async fn has_perm_push_checksums(
        &self,
        token: &str,
        namespace: &str,
        repository: &str,
    ) -> bool {
        let Some(perm) = self.lookup(token) else {
            return false;
        };
        perm.mode == Mode::Write && perm.namespace == namespace && perm.repository == repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authorize_grants_only_within_own_namespace() {
        let auth = LocalAuthenticator::new();
        assert!(auth
            .authorize("alice", "pw", "alice", "app", &["aaa".into()], Mode::Write)
            .await
            .is_some());
        assert!(auth
            .authorize("alice", "pw", "bob", "app", &["aaa".into()], Mode::Write)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn write_token_cannot_pull_and_vice_versa() {
        let auth = LocalAuthenticator::new();
        let images = vec!["123".to_owned(), "456".to_owned()];
        let write = auth
            .authorize("user", "pass", "user", "repo", &images, Mode::Write)
            .await
            .unwrap();
        let read = auth
            .authorize("user", "pass", "user", "repo", &images, Mode::Read)
            .await
            .unwrap();

        assert!(auth.has_perm_push_image(&write, "123").await);
        assert!(!auth.has_perm_push_image(&read, "123").await);
        assert!(!auth.has_perm_pull_image(&write, "123").await);
        assert!(auth.has_perm_pull_image(&read, "123").await);

        assert!(!auth.has_perm_push_image(&write, "invalid").await);

        assert!(
            auth.has_perm_push_tag(&write, "user", "repo", "123", "t")
                .await
        );
        assert!(
            !auth
                .has_perm_push_tag(&write, "user", "other", "123", "t")
                .await
        );
        assert!(
            !auth
                .has_perm_push_tag(&write, "other", "repo", "123", "t")
                .await
        );

        assert!(auth.has_perm_pull_tag(&read, "user", "repo").await);
        assert!(!auth.has_perm_pull_tag(&write, "user", "repo").await);

        assert!(auth.has_perm_push_checksums(&write, "user", "repo").await);
        assert!(!auth.has_perm_push_checksums(&read, "user", "repo").await);
    }

    #[tokio::test]
    async fn unknown_token_fails_every_predicate() {
        let auth = LocalAuthenticator::new();
        assert!(!auth.has_perm_push_image("bogus", "123").await);
        assert!(!auth.has_perm_pull_image("bogus", "123").await);
        assert!(!auth.has_perm_pull_tags("bogus", "ns", "repo").await);
        assert!(!auth.has_perm_push_checksums("bogus", "ns", "repo").await);
    }
}
