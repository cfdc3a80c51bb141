// ABOUTME: Tenant registry: application instances, LTI 1.3 registrations and organizations
// ABOUTME: Credential lookups, provisioning helpers, organization tree validation and settings persistence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Typed settings access and settings filters
pub mod settings;

use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::constants::limits::MAX_ORGANIZATION_DEPTH;
use crate::crypto::AesCipher;
use crate::database_plugins::factory::Database;
use crate::database_plugins::DatabaseProvider;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ApplicationInstance, LtiRegistration, NewApplicationInstance, NewLtiRegistration,
    NewOrganization, Organization,
};
use settings::{ApplicationSettings, SettingsFilter};

/// Prefix of generated LTI 1.1 consumer keys
const CONSUMER_KEY_PREFIX: &str = "Hypothesis";

fn random_hex(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buffer);
    hex::encode(buffer)
}

/// Generate a fresh `(consumer_key, shared_secret)` pair
#[must_use]
pub fn generate_lti11_credentials() -> (String, String) {
    (
        format!("{CONSUMER_KEY_PREFIX}{}", random_hex(16)),
        random_hex(32),
    )
}

/// Generate an organization public id
#[must_use]
pub fn generate_organization_public_id(authority: &str) -> String {
    let mut token = [0u8; 12];
    OsRng.fill_bytes(&mut token);
    format!("{authority}.lms.org.{}", URL_SAFE_NO_PAD.encode(token))
}

/// Lookup and provisioning of tenants
#[derive(Clone)]
pub struct TenantRegistry {
    db: Arc<Database>,
    cipher: AesCipher,
    clock: SharedClock,
}

impl TenantRegistry {
    /// Create a registry over `db`
    #[must_use]
    pub const fn new(db: Arc<Database>, cipher: AesCipher, clock: SharedClock) -> Self {
        Self { db, cipher, clock }
    }

    /// Cipher used for secret settings
    #[must_use]
    pub const fn cipher(&self) -> &AesCipher {
        &self.cipher
    }

    /// Tenant by LTI 1.1 consumer key
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn by_consumer_key(
        &self,
        consumer_key: &str,
    ) -> AppResult<Option<ApplicationInstance>> {
        self.db
            .get_application_instance_by_consumer_key(consumer_key)
            .await
    }

    /// Tenant by numeric id
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn by_id(&self, id: i64) -> AppResult<Option<ApplicationInstance>> {
        self.db.get_application_instance(id).await
    }

    /// Tenant by numeric id, or `NotFound`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no tenant has `id`.
    pub async fn require(&self, id: i64) -> AppResult<ApplicationInstance> {
        self.by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Application instance {id}")))
    }

    /// Registration for an OIDC login or id token
    ///
    /// Without a `client_id`, an issuer with exactly one registration matches
    /// on its own; an issuer with several is ambiguous and yields `None`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn registration(
        &self,
        issuer: &str,
        client_id: Option<&str>,
    ) -> AppResult<Option<LtiRegistration>> {
        if let Some(client_id) = client_id {
            return self
                .db
                .get_lti_registration_by_client_id(issuer, client_id)
                .await;
        }

        let mut registrations = self.db.list_lti_registrations_by_issuer(issuer).await?;
        if registrations.len() == 1 {
            Ok(registrations.pop())
        } else {
            if registrations.len() > 1 {
                warn!(issuer, "OIDC login without client_id for multi-registration issuer");
            }
            Ok(None)
        }
    }

    /// Registration by id
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn registration_by_id(&self, id: i64) -> AppResult<Option<LtiRegistration>> {
        self.db.get_lti_registration(id).await
    }

    /// Tenant by LTI 1.3 `(issuer, client_id, deployment_id)`
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn by_deployment(
        &self,
        issuer: &str,
        client_id: &str,
        deployment_id: &str,
    ) -> AppResult<Option<(LtiRegistration, ApplicationInstance)>> {
        let Some(registration) = self
            .db
            .get_lti_registration_by_client_id(issuer, client_id)
            .await?
        else {
            return Ok(None);
        };
        let instance = self
            .db
            .get_application_instance_by_deployment(registration.id, deployment_id)
            .await?;
        Ok(instance.map(|instance| (registration, instance)))
    }

    /// Create a platform registration
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for blank fields and propagates database errors.
    pub async fn create_registration(
        &self,
        registration: &NewLtiRegistration,
    ) -> AppResult<LtiRegistration> {
        for (field, value) in [
            ("issuer", &registration.issuer),
            ("client_id", &registration.client_id),
            ("auth_login_url", &registration.auth_login_url),
            ("key_set_url", &registration.key_set_url),
            ("token_url", &registration.token_url),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::invalid_input(format!("{field} is required")));
            }
        }
        let created = self
            .db
            .create_lti_registration(registration, self.clock.now())
            .await?;
        info!(
            registration_id = created.id,
            issuer = %created.issuer,
            "Created LTI registration"
        );
        Ok(created)
    }

    /// Create a tenant
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for incomplete credentials and propagates
    /// database errors.
    pub async fn create_application_instance(
        &self,
        instance: &NewApplicationInstance,
    ) -> AppResult<ApplicationInstance> {
        instance.validate()?;
        let created = self
            .db
            .create_application_instance(instance, self.clock.now())
            .await?;
        info!(application_instance_id = created.id, "Created application instance");
        Ok(created)
    }

    /// Organization by public id
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn organization_by_public_id(
        &self,
        public_id: &str,
    ) -> AppResult<Option<Organization>> {
        self.db.get_organization_by_public_id(public_id).await
    }

    /// Create an organization under an optional parent
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown parent and `InvalidInput` when the
    /// new organization would sit deeper than the allowed depth.
    pub async fn create_organization(
        &self,
        organization: &NewOrganization,
    ) -> AppResult<Organization> {
        if let Some(parent_id) = organization.parent_id {
            let ancestors = self.ancestor_chain(parent_id).await?;
            if ancestors.len() >= MAX_ORGANIZATION_DEPTH {
                return Err(AppError::invalid_input(format!(
                    "Organization tree may not be deeper than {MAX_ORGANIZATION_DEPTH}"
                )));
            }
        }
        self.db
            .create_organization(organization, self.clock.now())
            .await
    }

    /// Move an organization under `parent_id`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the move creates a cycle or exceeds the
    /// allowed depth.
    pub async fn set_organization_parent(&self, id: i64, parent_id: Option<i64>) -> AppResult<()> {
        if let Some(parent_id) = parent_id {
            let ancestors = self.ancestor_chain(parent_id).await?;
            if ancestors.iter().any(|org| org.id == id) {
                return Err(AppError::invalid_input(format!(
                    "Organization {parent_id} is a descendant of {id}"
                )));
            }
            if ancestors.len() >= MAX_ORGANIZATION_DEPTH {
                return Err(AppError::invalid_input(format!(
                    "Organization tree may not be deeper than {MAX_ORGANIZATION_DEPTH}"
                )));
            }
        }
        self.db
            .update_organization_parent(id, parent_id, self.clock.now())
            .await
    }

    /// Enable or disable an organization
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn set_organization_enabled(&self, id: i64, enabled: bool) -> AppResult<()> {
        self.db
            .update_organization_enabled(id, enabled, self.clock.now())
            .await
    }

    /// Whether an organization and every ancestor is enabled
    ///
    /// # Errors
    ///
    /// Propagates database errors and reports a broken chain as `Internal`.
    pub async fn organization_enabled(&self, id: i64) -> AppResult<bool> {
        Ok(self
            .ancestor_chain(id)
            .await?
            .iter()
            .all(|organization| organization.enabled))
    }

    /// `id` and its ancestors, nearest first
    async fn ancestor_chain(&self, id: i64) -> AppResult<Vec<Organization>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(id);

        while let Some(current) = next {
            if !seen.insert(current) || chain.len() > MAX_ORGANIZATION_DEPTH {
                return Err(AppError::internal(format!(
                    "Organization {id} has a cyclic or over-deep parent chain"
                )));
            }
            let organization = self
                .db
                .get_organization(current)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Organization {current}")))?;
            next = organization.parent_id;
            chain.push(organization);
        }
        Ok(chain)
    }

    /// Editable settings of a tenant
    #[must_use]
    pub fn settings(&self, instance: &ApplicationInstance) -> ApplicationSettings {
        ApplicationSettings::new(instance.settings.clone())
    }

    /// Persist dirty settings; clean settings are not written
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn save_settings(
        &self,
        instance_id: i64,
        settings: &mut ApplicationSettings,
    ) -> AppResult<bool> {
        if !settings.is_dirty() {
            return Ok(false);
        }
        self.db
            .update_application_instance_settings(
                instance_id,
                &settings.to_value(),
                self.clock.now(),
            )
            .await?;
        settings.mark_clean();
        Ok(true)
    }

    /// Tenants whose settings satisfy `filter`
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub async fn find_by_settings(
        &self,
        filter: &SettingsFilter,
    ) -> AppResult<Vec<ApplicationInstance>> {
        self.db.find_application_instances_by_settings(filter).await
    }
}
