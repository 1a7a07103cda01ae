//! Access provisioning against the data-governance service (Opal).
//!
//! Publishing to the warehouse ends with every loaded table registered as a
//! governed resource inside a project, readable by the project's access group.
//! Every object is checked before it is created, so re-running a publish for
//! the same tables creates nothing new.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::{GovernanceConfig, WarehouseConfig};
use crate::destination::postgres::WarehouseTable;
use crate::error::{ConfigError, GovernanceError, LakeportError};
use crate::secrets::SecretStore;

/// One provisioned table, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub postgresql_table_name: String,
    pub opal_resource_name: String,
    pub opal_project_name: String,
    pub opal_group_name: String,
}

/// A governance user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceUser {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Resource registration payload. `parameters` and `credentials` are JSON
/// documents carried as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub description: String,
    pub project: String,
    pub provider: String,
    pub factory: String,
    pub parameters: String,
    pub credentials: String,
}

/// Operations the provisioning flow needs from the governance service.
#[async_trait]
pub trait GovernanceApi: Send + Sync {
    async fn project_exists(&self, project: &str) -> Result<bool, GovernanceError>;
    async fn create_project(&self, project: &str, description: &str) -> Result<(), GovernanceError>;
    async fn group_exists(&self, group: &str) -> Result<bool, GovernanceError>;
    async fn get_user(&self, name: &str) -> Result<Option<GovernanceUser>, GovernanceError>;
    async fn create_user(&self, user: &GovernanceUser, password: &str) -> Result<(), GovernanceError>;
    async fn update_user(&self, user: &GovernanceUser) -> Result<(), GovernanceError>;
    /// Groups holding DataSHIELD permissions.
    async fn datashield_groups(&self) -> Result<Vec<String>, GovernanceError>;
    async fn grant_datashield_use(&self, group: &str) -> Result<(), GovernanceError>;
    async fn list_resources(&self, project: &str) -> Result<Vec<String>, GovernanceError>;
    async fn create_resource(&self, resource: &ResourceSpec) -> Result<(), GovernanceError>;
    /// Principals holding resource permissions in a project.
    async fn resource_principals(&self, project: &str) -> Result<Vec<String>, GovernanceError>;
    async fn grant_resource_view(&self, project: &str, group: &str) -> Result<(), GovernanceError>;
}

// ── Provisioning ────────────────────────────────────────────────────────────

pub fn group_name(project: &str) -> String {
    format!("{project}_group")
}

pub fn resource_name(prefix: &str, table: &WarehouseTable) -> String {
    format!("{prefix}_postgresql_{}_{}", table.schema, table.name)
}

fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn resource_spec(
    project: &str,
    name: String,
    table: &WarehouseTable,
    warehouse: &WarehouseConfig,
) -> Result<ResourceSpec, ConfigError> {
    let parameters = json!({
        "host": warehouse.host()?,
        "port": warehouse.port.to_string(),
        "db": warehouse.database()?,
        "table": table.name,
        "schema": table.schema,
        "driver": "postgresql",
    });
    let credentials = json!({
        "username": warehouse.readonly_username()?,
        "password": warehouse.readonly_password()?,
    });
    Ok(ResourceSpec {
        name,
        description: format!("Resource for table {} in schema {}", table.name, table.schema),
        project: project.to_string(),
        provider: "resourcer".into(),
        factory: "sql".into(),
        parameters: parameters.to_string(),
        credentials: credentials.to_string(),
    })
}

async fn ensure_project(api: &dyn GovernanceApi, project: &str) -> Result<(), GovernanceError> {
    if api.project_exists(project).await? {
        info!(project, "Governance project already exists");
        return Ok(());
    }
    info!(project, "Creating governance project");
    api.create_project(project, &format!("Data Access Request for project {project}"))
        .await
}

/// Groups exist through membership, so the group is created by adding the
/// default service user to it.
async fn ensure_group(
    api: &dyn GovernanceApi,
    group: &str,
    default_user: &str,
) -> Result<(), GovernanceError> {
    if api.group_exists(group).await? {
        info!(group, "Governance group already exists");
        return Ok(());
    }
    info!(group, "Creating governance group");
    match api.get_user(default_user).await? {
        None => {
            let user = GovernanceUser {
                name: default_user.to_string(),
                groups: vec![group.to_string()],
                enabled: true,
            };
            api.create_user(&user, &generate_password(20)).await
        }
        Some(mut user) if !user.groups.iter().any(|g| g == group) => {
            user.groups.push(group.to_string());
            api.update_user(&user).await
        }
        Some(_) => Ok(()),
    }
}

/// Register every table as a resource and grant the project group access.
pub async fn provision_access(
    api: &dyn GovernanceApi,
    config: &GovernanceConfig,
    warehouse: &WarehouseConfig,
    project: &str,
    tables: &[WarehouseTable],
) -> Result<Vec<AccessGrant>, LakeportError> {
    let group = group_name(project);

    ensure_project(api, project).await?;
    ensure_group(api, &group, &config.default_user).await?;

    if !api.datashield_groups().await?.contains(&group) {
        info!(group = %group, "Granting DataSHIELD use");
        api.grant_datashield_use(&group).await?;
    }

    let existing: BTreeSet<String> = api.list_resources(project).await?.into_iter().collect();
    let mut grants = Vec::with_capacity(tables.len());
    for table in tables {
        let name = resource_name(&config.resource_prefix, table);
        if !existing.contains(&name) {
            info!(resource = %name, "Creating governance resource");
            let spec = resource_spec(project, name.clone(), table, warehouse)?;
            api.create_resource(&spec).await?;
        }
        grants.push(AccessGrant {
            postgresql_table_name: table.qualified(),
            opal_resource_name: name,
            opal_project_name: project.to_string(),
            opal_group_name: group.clone(),
        });
    }

    if api.resource_principals(project).await?.contains(&group) {
        info!(group = %group, project, "Group already has resource access");
    } else {
        info!(group = %group, project, "Granting resource view");
        api.grant_resource_view(project, &group).await?;
    }

    Ok(grants)
}

// ── HTTP client ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubjectRef {
    principal: String,
}

#[derive(Debug, Deserialize)]
struct PermissionEntry {
    subject: SubjectRef,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    name: String,
}

/// Opal REST client authenticated with the administrator account.
pub struct OpalClient {
    client: reqwest::Client,
    base_url: String,
    auth: String,
}

impl OpalClient {
    pub fn new(client: reqwest::Client, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: STANDARD.encode(format!("{username}:{password}")),
        }
    }

    /// Build from settings, reading the administrator password from `secrets`.
    pub fn from_config(
        config: &GovernanceConfig,
        secrets: &dyn SecretStore,
        timeout_secs: u64,
    ) -> Result<Self, LakeportError> {
        let url = config.url.as_deref().ok_or(ConfigError::MissingGovernance)?;
        let password = secrets.get_secret(&config.password_secret)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(config.no_ssl_verify)
            .build()
            .map_err(transport)?;
        Ok(Self::new(client, url, &config.username, &password))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/ws{path}", self.base_url))
            .header("X-Opal-Auth", &self.auth)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, GovernanceError> {
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GovernanceError::Api {
            status: status.as_u16(),
            message: crate::http::upstream_message(status, &body),
        })
    }

    /// `true` on success, `false` on 404, error otherwise.
    async fn exists(&self, path: &str) -> Result<bool, GovernanceError> {
        match self.send(self.request(Method::GET, path)).await {
            Ok(_) => Ok(true),
            Err(GovernanceError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GovernanceError> {
        self.send(self.request(Method::GET, path))
            .await?
            .json()
            .await
            .map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> GovernanceError {
    GovernanceError::Transport {
        message: e.to_string(),
    }
}

#[async_trait]
impl GovernanceApi for OpalClient {
    async fn project_exists(&self, project: &str) -> Result<bool, GovernanceError> {
        self.exists(&format!("/project/{}", urlencoding::encode(project)))
            .await
    }

    async fn create_project(&self, project: &str, description: &str) -> Result<(), GovernanceError> {
        let body = json!({ "name": project, "title": project, "description": description });
        self.send(self.request(Method::POST, "/projects").json(&body))
            .await
            .map(|_| ())
    }

    async fn group_exists(&self, group: &str) -> Result<bool, GovernanceError> {
        self.exists(&format!("/system/group/{}", urlencoding::encode(group)))
            .await
    }

    async fn get_user(&self, name: &str) -> Result<Option<GovernanceUser>, GovernanceError> {
        let path = format!("/system/subject-credential/{}", urlencoding::encode(name));
        match self.get_json(&path).await {
            Ok(user) => Ok(Some(user)),
            Err(GovernanceError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_user(&self, user: &GovernanceUser, password: &str) -> Result<(), GovernanceError> {
        let body = json!({
            "name": user.name,
            "authenticationType": "PASSWORD",
            "password": password,
            "groups": user.groups,
            "enabled": user.enabled,
        });
        self.send(self.request(Method::POST, "/system/subject-credentials").json(&body))
            .await
            .map(|_| ())
    }

    async fn update_user(&self, user: &GovernanceUser) -> Result<(), GovernanceError> {
        let path = format!("/system/subject-credential/{}", urlencoding::encode(&user.name));
        let body = json!({
            "name": user.name,
            "authenticationType": "PASSWORD",
            "groups": user.groups,
            "enabled": user.enabled,
        });
        self.send(self.request(Method::PUT, &path).json(&body))
            .await
            .map(|_| ())
    }

    async fn datashield_groups(&self) -> Result<Vec<String>, GovernanceError> {
        let perms: Vec<PermissionEntry> = self
            .get_json("/system/permissions/datashield?type=GROUP")
            .await?;
        Ok(perms.into_iter().map(|p| p.subject.principal).collect())
    }

    async fn grant_datashield_use(&self, group: &str) -> Result<(), GovernanceError> {
        let builder = self
            .request(Method::POST, "/system/permissions/datashield")
            .query(&[("type", "GROUP"), ("permission", "DATASHIELD_USE"), ("principal", group)]);
        self.send(builder).await.map(|_| ())
    }

    async fn list_resources(&self, project: &str) -> Result<Vec<String>, GovernanceError> {
        let path = format!("/project/{}/resources", urlencoding::encode(project));
        let resources: Vec<ResourceEntry> = self.get_json(&path).await?;
        Ok(resources.into_iter().map(|r| r.name).collect())
    }

    async fn create_resource(&self, resource: &ResourceSpec) -> Result<(), GovernanceError> {
        let path = format!("/project/{}/resources", urlencoding::encode(&resource.project));
        self.send(self.request(Method::POST, &path).json(resource))
            .await
            .map(|_| ())
    }

    async fn resource_principals(&self, project: &str) -> Result<Vec<String>, GovernanceError> {
        let path = format!("/project/{}/permissions/resources", urlencoding::encode(project));
        let perms: Vec<PermissionEntry> = self.get_json(&path).await?;
        Ok(perms.into_iter().map(|p| p.subject.principal).collect())
    }

    async fn grant_resource_view(&self, project: &str, group: &str) -> Result<(), GovernanceError> {
        let path = format!("/project/{}/permissions/resources", urlencoding::encode(project));
        let builder = self
            .request(Method::POST, &path)
            .query(&[("type", "GROUP"), ("permission", "RESOURCES_VIEW"), ("principal", group)]);
        self.send(builder).await.map(|_| ())
    }
}

// ── In-memory fake ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GovernanceState {
    projects: BTreeSet<String>,
    users: BTreeMap<String, GovernanceUser>,
    datashield: BTreeSet<String>,
    resources: BTreeMap<String, Vec<ResourceSpec>>,
    resource_principals: BTreeMap<String, BTreeSet<String>>,
    created: usize,
}

/// In-memory governance service for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryGovernance {
    state: Mutex<GovernanceState>,
}

impl InMemoryGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects created or updated so far.
    pub fn created_count(&self) -> usize {
        self.state.lock().map(|s| s.created).unwrap_or_default()
    }

    pub fn resources(&self, project: &str) -> Vec<ResourceSpec> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.resources.get(project).cloned())
            .unwrap_or_default()
    }

    pub fn user(&self, name: &str) -> Option<GovernanceUser> {
        self.state.lock().ok().and_then(|s| s.users.get(name).cloned())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut GovernanceState) -> T) -> Result<T, GovernanceError> {
        let mut state = self.state.lock().map_err(|_| GovernanceError::Transport {
            message: "governance state lock poisoned".into(),
        })?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl GovernanceApi for InMemoryGovernance {
    async fn project_exists(&self, project: &str) -> Result<bool, GovernanceError> {
        self.with_state(|s| s.projects.contains(project))
    }

    async fn create_project(&self, project: &str, _description: &str) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.projects.insert(project.to_string());
            s.created += 1;
        })
    }

    async fn group_exists(&self, group: &str) -> Result<bool, GovernanceError> {
        self.with_state(|s| {
            s.users
                .values()
                .any(|u| u.groups.iter().any(|g| g == group))
        })
    }

    async fn get_user(&self, name: &str) -> Result<Option<GovernanceUser>, GovernanceError> {
        self.with_state(|s| s.users.get(name).cloned())
    }

    async fn create_user(&self, user: &GovernanceUser, _password: &str) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.users.insert(user.name.clone(), user.clone());
            s.created += 1;
        })
    }

    async fn update_user(&self, user: &GovernanceUser) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.users.insert(user.name.clone(), user.clone());
            s.created += 1;
        })
    }

    async fn datashield_groups(&self) -> Result<Vec<String>, GovernanceError> {
        self.with_state(|s| s.datashield.iter().cloned().collect())
    }

    async fn grant_datashield_use(&self, group: &str) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.datashield.insert(group.to_string());
            s.created += 1;
        })
    }

    async fn list_resources(&self, project: &str) -> Result<Vec<String>, GovernanceError> {
        self.with_state(|s| {
            s.resources
                .get(project)
                .map(|r| r.iter().map(|spec| spec.name.clone()).collect())
                .unwrap_or_default()
        })
    }

    async fn create_resource(&self, resource: &ResourceSpec) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.resources
                .entry(resource.project.clone())
                .or_default()
                .push(resource.clone());
            s.created += 1;
        })
    }

    async fn resource_principals(&self, project: &str) -> Result<Vec<String>, GovernanceError> {
        self.with_state(|s| {
            s.resource_principals
                .get(project)
                .map(|p| p.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn grant_resource_view(&self, project: &str, group: &str) -> Result<(), GovernanceError> {
        self.with_state(|s| {
            s.resource_principals
                .entry(project.to_string())
                .or_default()
                .insert(group.to_string());
            s.created += 1;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use pretty_assertions::assert_eq;

    fn warehouse() -> WarehouseConfig {
        WarehouseConfig {
            host: Some("warehouse.internal".into()),
            database: Some("analytics".into()),
            username: Some("loader".into()),
            password: Some("secret".into()),
            readonly_username: Some("reader".into()),
            readonly_password: Some("ro-secret".into()),
            ..WarehouseConfig::default()
        }
    }

    fn tables() -> Vec<WarehouseTable> {
        vec![
            WarehouseTable {
                schema: "acme_20250101_120000_sales".into(),
                name: "orders".into(),
            },
            WarehouseTable {
                schema: "acme_20250101_120000_sales".into(),
                name: "customers".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_provision_creates_everything_once() {
        let api = InMemoryGovernance::new();
        let config = GovernanceConfig::default();
        let grants = provision_access(&api, &config, &warehouse(), "acme", &tables())
            .await
            .unwrap();

        assert_eq!(grants.len(), 2);
        assert_eq!(
            grants[0],
            AccessGrant {
                postgresql_table_name: "acme_20250101_120000_sales.orders".into(),
                opal_resource_name: "tre_postgresql_acme_20250101_120000_sales_orders".into(),
                opal_project_name: "acme".into(),
                opal_group_name: "acme_group".into(),
            }
        );
        // project, default user, datashield, two resources, resource view
        assert_eq!(api.created_count(), 6);
        let user = api.user("dsuser_default").unwrap();
        assert_eq!(user.groups, vec!["acme_group".to_string()]);

        let resource = &api.resources("acme")[0];
        assert_eq!(resource.provider, "resourcer");
        assert_eq!(resource.factory, "sql");
        let params: serde_json::Value = serde_json::from_str(&resource.parameters).unwrap();
        assert_eq!(params["driver"], "postgresql");
        assert_eq!(params["port"], "5432");
        assert_eq!(params["table"], "orders");
        let creds: serde_json::Value = serde_json::from_str(&resource.credentials).unwrap();
        assert_eq!(creds["username"], "reader");
    }

    #[tokio::test]
    async fn test_provision_rerun_creates_nothing() {
        let api = InMemoryGovernance::new();
        let config = GovernanceConfig::default();
        let first = provision_access(&api, &config, &warehouse(), "acme", &tables())
            .await
            .unwrap();
        let before = api.created_count();

        let second = provision_access(&api, &config, &warehouse(), "acme", &tables())
            .await
            .unwrap();
        assert_eq!(api.created_count(), before);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_existing_user_gains_new_group() {
        let api = InMemoryGovernance::new();
        let config = GovernanceConfig::default();
        provision_access(&api, &config, &warehouse(), "acme", &tables())
            .await
            .unwrap();
        provision_access(&api, &config, &warehouse(), "globex", &tables())
            .await
            .unwrap();
        let user = api.user("dsuser_default").unwrap();
        assert_eq!(
            user.groups,
            vec!["acme_group".to_string(), "globex_group".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_readonly_credentials_fail() {
        let api = InMemoryGovernance::new();
        let warehouse = WarehouseConfig {
            readonly_username: None,
            ..warehouse()
        };
        let err = provision_access(&api, &GovernanceConfig::default(), &warehouse, "acme", &tables())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LakeportError::Config(ConfigError::MissingWarehouse { .. })
        ));
    }

    #[test]
    fn test_generate_password() {
        let password = generate_password(20);
        assert_eq!(password.len(), 20);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_opal_client_maps_not_found_and_errors() {
        let app = Router::new()
            .route("/ws/project/acme", get(|| async { AxumStatus::NOT_FOUND }))
            .route(
                "/ws/project/acme/resources",
                get(|| async {
                    (
                        AxumStatus::FORBIDDEN,
                        r#"{"status":"Forbidden","message":"Access denied"}"#,
                    )
                }),
            )
            .route(
                "/ws/system/permissions/datashield",
                get(|| async { r#"[{"subject":{"principal":"acme_group","type":"GROUP"}}]"# }),
            );
        let base = serve(app).await;
        let client = OpalClient::new(reqwest::Client::new(), &base, "administrator", "pw");

        assert!(!client.project_exists("acme").await.unwrap());
        assert_eq!(
            client.datashield_groups().await.unwrap(),
            vec!["acme_group".to_string()]
        );
        let err = client.list_resources("acme").await.unwrap_err();
        assert_eq!(err.to_string(), "Opal module failure: 403 - Access denied");
    }
}
