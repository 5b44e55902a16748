//! Derived names and endpoints.
//!
//! Every remote name is a pure function of the validated `Parameters` and the
//! target cloud. Nothing here performs I/O; identical inputs always produce
//! identical `DerivedValues`, which is what keeps re-applies from creating
//! duplicate resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::params::Parameters;

/// Blob container names are limited to 63 characters.
pub const CONTAINER_NAME_MAX: usize = 63;

// ---------------------------------------------------------------------------
// CloudEnvironment
// ---------------------------------------------------------------------------

/// Sovereign cloud the resources live in. Selects domain suffixes and the
/// management endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudEnvironment {
    #[default]
    AzureCloud,
    AzureChinaCloud,
    AzureUsGovernment,
}

impl CloudEnvironment {
    pub fn storage_suffix(&self) -> &'static str {
        match self {
            CloudEnvironment::AzureCloud => "core.windows.net",
            CloudEnvironment::AzureChinaCloud => "core.chinacloudapi.cn",
            CloudEnvironment::AzureUsGovernment => "core.usgovcloudapi.net",
        }
    }

    pub fn sites_suffix(&self) -> &'static str {
        match self {
            CloudEnvironment::AzureCloud => "azurewebsites.net",
            CloudEnvironment::AzureChinaCloud => "chinacloudsites.cn",
            CloudEnvironment::AzureUsGovernment => "azurewebsites.us",
        }
    }

    pub fn resource_manager(&self) -> &'static str {
        match self {
            CloudEnvironment::AzureCloud => "https://management.azure.com",
            CloudEnvironment::AzureChinaCloud => "https://management.chinacloudapi.cn",
            CloudEnvironment::AzureUsGovernment => "https://management.usgovcloudapi.net",
        }
    }
}

impl FromStr for CloudEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "azurecloud" | "azure_cloud" | "public" => Ok(CloudEnvironment::AzureCloud),
            "azurechinacloud" | "azure_china_cloud" | "china" => {
                Ok(CloudEnvironment::AzureChinaCloud)
            }
            "azureusgovernment" | "azure_us_government" | "usgov" => {
                Ok(CloudEnvironment::AzureUsGovernment)
            }
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloudEnvironment::AzureCloud => "AzureCloud",
            CloudEnvironment::AzureChinaCloud => "AzureChinaCloud",
            CloudEnvironment::AzureUsGovernment => "AzureUSGovernment",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// DerivedValues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedValues {
    pub storage_account_name: String,
    pub plan_name: String,
    pub host_name: String,
    pub deployment_container_name: String,
    pub blob_endpoint: String,
    pub queue_endpoint: String,
    pub table_endpoint: String,
    /// Hostname the platform is expected to assign. The materialized value
    /// from the host wins when present.
    pub host_default_domain: String,
}

impl DerivedValues {
    /// URL the host pulls deployment packages from.
    pub fn deployment_container_url(&self) -> String {
        format!("{}{}", self.blob_endpoint, self.deployment_container_name)
    }
}

pub fn derive(params: &Parameters, cloud: CloudEnvironment) -> DerivedValues {
    let base = params.base_name.as_str();
    let storage_account_name = format!("{}sa", base);
    let host_name = format!("{}-func", base);
    let endpoint = |service: &str| {
        format!(
            "https://{}.{}.{}/",
            storage_account_name,
            service,
            cloud.storage_suffix()
        )
    };

    let mut deployment_container_name = format!("app-package-{}", host_name);
    deployment_container_name.truncate(CONTAINER_NAME_MAX);

    DerivedValues {
        blob_endpoint: endpoint("blob"),
        queue_endpoint: endpoint("queue"),
        table_endpoint: endpoint("table"),
        plan_name: params.tier.plan_name(base),
        host_default_domain: format!("{}.{}", host_name, cloud.sites_suffix()),
        deployment_container_name,
        host_name,
        storage_account_name,
    }
}
