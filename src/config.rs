// splitpay/src/config.rs
// Environment-sourced configuration, read once at startup and injected into each adapter

use secrecy::SecretString;
use std::collections::HashMap;

use crate::error::{Result, SplitError};

const MARKETPLACE_API_URL: &str = "https://api.mercadopago.com";
const DIRECT_PIX_SANDBOX_URL: &str = "https://pix-h.api.efipay.com.br";
const DIRECT_PIX_PRODUCTION_URL: &str = "https://pix.api.efipay.com.br";

// ═══════════════════════════════════════════════════════════════════════════════
// GATEWAY SECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    /// Platform-level OAuth application id
    pub client_id: String,
    pub client_secret: SecretString,
    /// Platform access token used to re-fetch payments announced by webhooks
    pub access_token: SecretString,
    pub webhook_secret: Option<SecretString>,
    pub api_url: String,
}

#[derive(Clone, Debug)]
pub struct DirectPixConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Base64 PKCS#12 bundle holding the mTLS client certificate
    pub certificate_base64: SecretString,
    pub certificate_password: SecretString,
    /// Platform receiving key, also the charge's `chave`
    pub pix_key: String,
    pub account_id: String,
    pub webhook_secret: Option<SecretString>,
    pub sandbox: bool,
    pub api_url: String,
    pub charge_expiration_secs: u32,
}

impl DirectPixConfig {
    pub fn environment(&self) -> &'static str {
        if self.sandbox {
            "sandbox"
        } else {
            "production"
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckoutUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    /// Externally reachable base, used for `notification_url`s
    pub public_base_url: String,
    pub checkout_urls: CheckoutUrls,
    pub redis_url: Option<String>,
    pub token_encryption_key: Option<SecretString>,
    pub seed_file: Option<String>,
    pub marketplace: Option<MarketplaceConfig>,
    pub direct_pix: Option<DirectPixConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// A gateway with none of its variables set is disabled; one with only
    /// some of them set is a configuration error.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let env = Env { vars };

        let public_base_url = env
            .get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let port = match env.get("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| SplitError::Configuration(format!("PORT is not a valid port: {}", raw)))?,
            None => 3000,
        };

        let checkout_urls = CheckoutUrls {
            success: env
                .get("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|| format!("{}/success", public_base_url)),
            failure: env
                .get("CHECKOUT_FAILURE_URL")
                .unwrap_or_else(|| format!("{}/failure", public_base_url)),
            pending: env
                .get("CHECKOUT_PENDING_URL")
                .unwrap_or_else(|| format!("{}/pending", public_base_url)),
        };

        Ok(Self {
            port,
            checkout_urls,
            redis_url: env.get("REDIS_URL"),
            token_encryption_key: env.get("TOKEN_ENCRYPTION_KEY").map(SecretString::from),
            seed_file: env.get("SEED_FILE"),
            marketplace: marketplace_section(&env)?,
            direct_pix: direct_pix_section(&env)?,
            public_base_url,
        })
    }
}

struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Blank values count as unset
    fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn any_set(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| self.get(key).is_some())
    }

    fn require(&self, section: &str, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| {
            SplitError::Configuration(format!("{} configuration incomplete: {} is missing", section, key))
        })
    }
}

fn marketplace_section(env: &Env) -> Result<Option<MarketplaceConfig>> {
    const KEYS: [&str; 4] = ["MP_CLIENT_ID", "MP_APP_ID", "MP_CLIENT_SECRET", "MP_ACCESS_TOKEN"];
    if !env.any_set(&KEYS) {
        return Ok(None);
    }

    let client_id = match env.get("MP_CLIENT_ID") {
        Some(id) => id,
        None => env.require("Marketplace", "MP_APP_ID")?,
    };

    Ok(Some(MarketplaceConfig {
        client_id,
        client_secret: env.require("Marketplace", "MP_CLIENT_SECRET")?.into(),
        access_token: env.require("Marketplace", "MP_ACCESS_TOKEN")?.into(),
        webhook_secret: env.get("MP_WEBHOOK_SECRET").map(SecretString::from),
        api_url: env
            .get("MP_API_URL")
            .unwrap_or_else(|| MARKETPLACE_API_URL.to_string())
            .trim_end_matches('/')
            .to_string(),
    }))
}

fn direct_pix_section(env: &Env) -> Result<Option<DirectPixConfig>> {
    const KEYS: [&str; 5] = [
        "EFI_CLIENT_ID",
        "EFI_CLIENT_SECRET",
        "EFI_CERTIFICATE_BASE64",
        "EFI_PIX_KEY",
        "EFI_ACCOUNT_ID",
    ];
    if !env.any_set(&KEYS) {
        return Ok(None);
    }

    let sandbox = env
        .get("EFI_SANDBOX")
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_url = if sandbox {
        DIRECT_PIX_SANDBOX_URL
    } else {
        DIRECT_PIX_PRODUCTION_URL
    };

    let charge_expiration_secs = match env.get("EFI_CHARGE_EXPIRATION_SECS") {
        Some(raw) => raw.parse().map_err(|_| {
            SplitError::Configuration(format!("EFI_CHARGE_EXPIRATION_SECS is not a number: {}", raw))
        })?,
        None => 3600,
    };

    Ok(Some(DirectPixConfig {
        client_id: env.require("Direct PIX", "EFI_CLIENT_ID")?,
        client_secret: env.require("Direct PIX", "EFI_CLIENT_SECRET")?.into(),
        certificate_base64: env.require("Direct PIX", "EFI_CERTIFICATE_BASE64")?.into(),
        // an empty import password is legitimate, so read it raw
        certificate_password: env
            .vars
            .get("EFI_CERTIFICATE_PASSWORD")
            .cloned()
            .unwrap_or_default()
            .into(),
        pix_key: env.require("Direct PIX", "EFI_PIX_KEY")?,
        account_id: env.require("Direct PIX", "EFI_ACCOUNT_ID")?,
        webhook_secret: env.get("EFI_WEBHOOK_SECRET").map(SecretString::from),
        sandbox,
        api_url: env
            .get("EFI_API_URL")
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string(),
        charge_expiration_secs,
    }))
}
