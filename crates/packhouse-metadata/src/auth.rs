//! Permission Contract
//!
//! Every session operation checks the caller's rights on the package it
//! touches before any data moves. The contract is a single question: does
//! this username hold this level of access on this package?
//!
//! The check is **fail-closed**. Callers treat both `Ok(false)` and `Err`
//! as denial; an unreachable permission backend must never grant access.
//!
//! Two implementations ship here:
//! - [`StaticPermissions`]: an explicit grant table, used in tests and
//!   single-tenant setups with a fixed user list
//! - [`OpenPermissions`]: allows everything, for local development

use crate::error::Result;
use async_trait::async_trait;
use packhouse_core::PackageRef;
use std::collections::HashMap;
use tracing::warn;

/// Access level on a package.
///
/// Levels are ordered: `Edit` includes everything `View` allows, so a
/// grant satisfies any requirement at or below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Read package data (fetch batches)
    View,
    /// Write package data (upload, activate batches)
    Edit,
}

/// Authorization backend for session operations.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    /// Whether `username` holds at least `level` on `package`.
    async fn has_permission(
        &self,
        username: &str,
        package: &PackageRef,
        level: Permission,
    ) -> Result<bool>;
}

/// Fixed grant table, assembled at startup.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: HashMap<(String, PackageRef), Permission>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `username` the given level on `package`.
    pub fn with_grant(
        mut self,
        username: impl Into<String>,
        package: PackageRef,
        level: Permission,
    ) -> Self {
        self.grants.insert((username.into(), package), level);
        self
    }
}

#[async_trait]
impl PermissionCheck for StaticPermissions {
    async fn has_permission(
        &self,
        username: &str,
        package: &PackageRef,
        level: Permission,
    ) -> Result<bool> {
        let granted = self
            .grants
            .get(&(username.to_string(), package.clone()))
            .copied();
        Ok(granted.is_some_and(|g| g >= level))
    }
}

/// Allow-all backend for local development.
pub struct OpenPermissions;

impl OpenPermissions {
    pub fn new() -> Self {
        warn!("permission checks are disabled; every user can read and write every package");
        Self
    }
}

impl Default for OpenPermissions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionCheck for OpenPermissions {
    async fn has_permission(
        &self,
        _username: &str,
        _package: &PackageRef,
        _level: Permission,
    ) -> Result<bool> {
        Ok(true)
    }
}
