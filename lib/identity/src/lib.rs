//! External identity linking, sessions, and path authorization.
//!
//! This crate provides:
//! - Resolution of provider accounts to local users (`IdentityLinker`)
//! - Sessions carrying a role snapshot (`SessionIssuer`, `Session`)
//! - Path-prefix policies and per-request decisions (`PolicyRegistry`,
//!   `AuthorizationGate`)
//! - Role and account administration (`RoleAdministrator`)
//! - The `ExternalProvider` seam and per-provider OAuth settings
//!
//! Storage is abstracted behind [`CredentialStore`] and [`SessionStore`];
//! [`memory`] has in-process implementations.
//!
//! # Example
//!
//! ```
//! use portcullis_identity::{
//!     AuthorizationGate, Decision, DenyReason, PolicyRegistry, Role, RoleSet, Session,
//!     SessionId,
//! };
//! use portcullis_core::UserId;
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! let registry = PolicyRegistry::builder()
//!     .register("/Games", None)
//!     .register("/Admin", Some(Role::Admin))
//!     .build()
//!     .expect("valid prefixes");
//! let gate = AuthorizationGate::new(Arc::new(registry));
//!
//! let session = Session::new(
//!     SessionId::generate(),
//!     UserId::new(),
//!     RoleSet::none().with(Role::User),
//!     Utc::now(),
//!     Duration::minutes(30),
//! );
//!
//! assert_eq!(gate.authorize(Some(&session), "/Games/Chess"), Decision::Allow);
//! assert_eq!(
//!     gate.authorize(Some(&session), "/Admin/Users"),
//!     Decision::Deny(DenyReason::MissingRole { required: Role::Admin })
//! );
//! assert_eq!(
//!     gate.authorize(None, "/Games"),
//!     Decision::Deny(DenyReason::Unauthenticated)
//! );
//! ```

pub mod admin;
pub mod error;
pub mod gate;
pub mod issuer;
pub mod linker;
pub mod memory;
pub mod policy;
pub mod provider;
pub mod role;
pub mod session;
pub mod settings;
pub mod store;
pub mod user;

pub use admin::{IdentityRef, RoleAdministrator};
pub use error::{IdentityProviderError, LinkError, PolicyError, SessionCreationError, StoreError};
pub use gate::{AuthorizationGate, Decision, DenyReason, TokenAuthorization};
pub use issuer::SessionIssuer;
pub use linker::{IdentityLinker, LinkOutcome};
pub use memory::{InMemoryCredentialStore, InMemorySessionStore};
pub use policy::{PolicyRegistry, PolicyRegistryBuilder, PolicyRule};
pub use provider::{
    AuthorizationRequest, ExternalProvider, ProfileClaims, Provider, ProviderProfile,
};
pub use role::{Role, RoleSet};
pub use session::{Session, SessionId};
pub use settings::{ProviderSettings, ProvidersConfig, WellKnownEndpoints};
pub use store::{CredentialStore, SessionStore};
pub use user::{ExternalIdentityLink, User};
