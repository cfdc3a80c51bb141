// ABOUTME: Administrative command line for the LTI launch core
// ABOUTME: Provisions organizations, registrations and tenants and manages the signing keyset
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # lti-cli
//!
//! ```bash
//! lti-cli organization create --name "Example University"
//! lti-cli registration create --issuer https://canvas.instructure.com --client-id 10000000000001 \
//!     --auth-login-url https://sso.canvaslms.com/api/lti/authorize_redirect \
//!     --key-set-url https://sso.canvaslms.com/api/lti/security/jwks \
//!     --token-url https://sso.canvaslms.com/login/oauth2/token
//! lti-cli instance create --lms-url https://example.instructure.com
//! lti-cli instance set-secret --id 1 --group canvas --key developer_secret --value s3cret
//! lti-cli keys rotate
//! ```
//!
//! Configuration is read from the same environment as the server.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lti_launch::config::environment::ServerConfig;
use lti_launch::context::ServerResources;
use lti_launch::logging::{self, LogFormat};

#[derive(Parser)]
#[command(name = "lti-cli", version, about = "LTI launch administration")]
struct Cli {
    /// Database URL override
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Organization management
    #[command(subcommand)]
    Organization(OrganizationCommand),

    /// LTI 1.3 platform registrations
    #[command(subcommand)]
    Registration(RegistrationCommand),

    /// Application instances (tenants)
    #[command(subcommand)]
    Instance(InstanceCommand),

    /// Signing keyset
    #[command(subcommand)]
    Keys(KeysCommand),
}

#[derive(Subcommand)]
enum OrganizationCommand {
    /// Create an organization
    Create {
        /// Display name
        #[arg(long)]
        name: String,
        /// Public id of the parent organization
        #[arg(long)]
        parent: Option<String>,
        /// Create the organization disabled
        #[arg(long)]
        disabled: bool,
    },
}

#[derive(Subcommand)]
enum RegistrationCommand {
    /// Register an LTI 1.3 platform
    Create {
        #[arg(long)]
        issuer: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        auth_login_url: String,
        #[arg(long)]
        key_set_url: String,
        #[arg(long)]
        token_url: String,
    },
}

#[derive(Subcommand)]
enum InstanceCommand {
    /// Create a tenant; LTI 1.1 credentials are generated unless a deployment is given
    Create {
        /// LMS base URL
        #[arg(long)]
        lms_url: Option<String>,
        /// Public id of the owning organization
        #[arg(long)]
        organization: Option<String>,
        /// LTI 1.3 registration id
        #[arg(long, requires = "deployment_id")]
        registration_id: Option<i64>,
        /// LTI 1.3 deployment id
        #[arg(long, requires = "registration_id")]
        deployment_id: Option<String>,
    },
    /// Print a tenant as JSON
    Show {
        /// Numeric id
        #[arg(long, conflicts_with = "consumer_key")]
        id: Option<i64>,
        /// LTI 1.1 consumer key
        #[arg(long)]
        consumer_key: Option<String>,
    },
    /// Store an encrypted settings value
    SetSecret {
        #[arg(long)]
        id: i64,
        /// Settings group, e.g. `canvas`
        #[arg(long)]
        group: String,
        /// Key within the group, e.g. `developer_secret`
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Run one rotation pass with the configured policy
    Rotate,
    /// List stored keys
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let directive = if cli.verbose { "debug" } else { "warn" };
    logging::init(LogFormat::Text, directive)?;

    let mut config = ServerConfig::from_env().context("Invalid configuration")?;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    let resources = ServerResources::from_config(config)
        .await
        .context("Failed to initialise resources")?;

    let outcome = match cli.command {
        Command::Organization(OrganizationCommand::Create {
            name,
            parent,
            disabled,
        }) => commands::organization::create(&resources, name, parent.as_deref(), !disabled).await,
        Command::Registration(RegistrationCommand::Create {
            issuer,
            client_id,
            auth_login_url,
            key_set_url,
            token_url,
        }) => {
            commands::registration::create(
                &resources,
                issuer,
                client_id,
                auth_login_url,
                key_set_url,
                token_url,
            )
            .await
        }
        Command::Instance(InstanceCommand::Create {
            lms_url,
            organization,
            registration_id,
            deployment_id,
        }) => {
            commands::instance::create(
                &resources,
                lms_url,
                organization.as_deref(),
                registration_id.zip(deployment_id),
            )
            .await
        }
        Command::Instance(InstanceCommand::Show { id, consumer_key }) => {
            commands::instance::show(&resources, id, consumer_key.as_deref()).await
        }
        Command::Instance(InstanceCommand::SetSecret {
            id,
            group,
            key,
            value,
        }) => commands::instance::set_secret(&resources, id, &group, &key, &value).await,
        Command::Keys(KeysCommand::Rotate) => commands::keys::rotate(&resources).await,
        Command::Keys(KeysCommand::List) => commands::keys::list(&resources).await,
    };
    Ok(outcome?)
}
