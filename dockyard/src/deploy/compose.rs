//! Compose manifest generation
//!
//! Rendering is pure: the same inputs always produce byte-identical YAML.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::errors::DockyardError;
use crate::filesys::file::File;
use crate::models::project::EnvVar;

/// Manifest file name at the project root
pub const MANIFEST_FILE: &str = "docker-compose.yml";

/// One service to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeService {
    pub name: String,
    pub container_name: String,
    /// Recipe path relative to the project root
    pub dockerfile_path: String,
    pub internal_port: u16,
    pub external_port: u16,
}

#[derive(Serialize)]
struct Manifest {
    services: BTreeMap<String, ServiceSpec>,
    networks: BTreeMap<String, NetworkSpec>,
}

#[derive(Serialize)]
struct ServiceSpec {
    build: BuildSpec,
    container_name: String,
    ports: Vec<String>,
    restart: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct BuildSpec {
    context: String,
    dockerfile: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    args: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct NetworkSpec {
    external: bool,
    name: String,
}

/// Render the compose manifest for a project
pub fn render_manifest(
    project_id: &str,
    services: &[ComposeService],
    env: &[EnvVar],
    network: &str,
) -> Result<String, DockyardError> {
    if services.is_empty() {
        return Err(DockyardError::ValidationError(format!(
            "Project {} has no services to render",
            project_id
        )));
    }

    let build_args: BTreeMap<String, String> = env
        .iter()
        .filter(|v| v.build_arg)
        .map(|v| (v.key.clone(), v.value.clone()))
        .collect();
    let environment: BTreeMap<String, String> = env
        .iter()
        .filter(|v| v.runtime)
        .map(|v| (v.key.clone(), v.value.clone()))
        .collect();

    let services = services
        .iter()
        .map(|service| {
            let (context, dockerfile) = split_recipe_path(&service.dockerfile_path);
            let spec = ServiceSpec {
                build: BuildSpec {
                    context,
                    dockerfile,
                    args: build_args.clone(),
                },
                container_name: service.container_name.clone(),
                ports: vec![format!("{}:{}", service.external_port, service.internal_port)],
                restart: "unless-stopped",
                environment: environment.clone(),
            };
            (service.name.clone(), spec)
        })
        .collect();

    let mut networks = BTreeMap::new();
    networks.insert(
        "default".to_string(),
        NetworkSpec {
            external: true,
            name: network.to_string(),
        },
    );

    let yaml = serde_yaml::to_string(&Manifest { services, networks })?;
    Ok(yaml)
}

/// Render and write `docker-compose.yml` at the project root, overwriting
pub async fn write_manifest(
    root: &Path,
    project_id: &str,
    services: &[ComposeService],
    env: &[EnvVar],
    network: &str,
) -> Result<(), DockyardError> {
    let yaml = render_manifest(project_id, services, env, network)?;
    let file = File::new(root.join(MANIFEST_FILE));
    file.write_string(&yaml).await?;
    debug!("Wrote {} ({} services)", file.path().display(), services.len());
    Ok(())
}

/// `worker/Dockerfile` -> (`./worker`, `Dockerfile`)
fn split_recipe_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, file)) if !dir.is_empty() => (format!("./{}", dir), file.to_string()),
        Some((_, file)) => (".".to_string(), file.to_string()),
        None => (".".to_string(), path.to_string()),
    }
}
