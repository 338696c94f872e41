//! Job commands.

use anyhow::Result;
use remotebuild_core::spec::keys;
use remotebuild_core::{BuildArgs, BuildSpec, JobType, UploadType};
use serde_json::{Value, json};

use super::ApiClient;

/// Flags of `remotebuild submit`.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub package: String,
    pub upload: UploadType,
    pub no_ccache: bool,
    pub dm_host: Option<String>,
    pub dm_user: Option<String>,
    pub dm_token: Option<String>,
    pub dm_namespace: Option<String>,
}

impl SubmitOptions {
    pub fn into_spec(self) -> BuildSpec {
        let mut args = BuildArgs::new().with(keys::AUR_PACKAGE, self.package);
        if self.no_ccache {
            args = args.with(keys::DISABLE_CCACHE, "true");
        }
        let optional = [
            (keys::DM_HOST, self.dm_host),
            (keys::DM_USER, self.dm_user),
            (keys::DM_TOKEN, self.dm_token),
            (keys::DM_NAMESPACE, self.dm_namespace),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                args = args.with(key, value);
            }
        }
        BuildSpec {
            job_type: JobType::Aur,
            upload_type: self.upload,
            args,
        }
    }
}

pub async fn submit(api_url: &str, options: SubmitOptions) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let added: Option<Value> = client.post("/job/add", &options.into_spec()).await?;
    if let Some(added) = added {
        println!(
            "Submitted job {} (position {})",
            text(&added["id"]),
            text(&added["position"])
        );
    }
    Ok(())
}

pub async fn cancel(api_url: &str, id: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let _: Option<Value> = client.post("/job/cancel", &json!({ "id": id })).await?;
    println!("Cancelled job {}", id);
    Ok(())
}

pub async fn info(api_url: &str, id: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    match client.get::<Value>(&format!("/job/info/{}", id)).await? {
        Some(job) => print_job(&job),
        None => println!("Job {} not found", id),
    }
    Ok(())
}

pub async fn list(api_url: &str, limit: usize) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let jobs: Vec<Value> = client
        .get(&format!("/jobs?limit={}", limit))
        .await?
        .unwrap_or_default();
    if jobs.is_empty() {
        println!("No finished jobs");
        return Ok(());
    }
    for job in &jobs {
        println!("{}", summary_line(job));
    }
    Ok(())
}

pub async fn logs(api_url: &str, id: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let logs: Option<String> = client.get(&format!("/job/logs/{}", id)).await?;
    print!("{}", logs.unwrap_or_default());
    Ok(())
}

fn print_job(job: &Value) {
    println!("Job:      {}", text(&job["id"]));
    println!("State:    {}", text(&job["state"]));
    println!("Type:     {}", text(&job["job_type"]));
    println!("Image:    {}", text(&job["build"]["image"]));
    println!("Build:    {}", text(&job["build"]["state"]));
    println!(
        "Upload:   {} ({})",
        text(&job["upload"]["state"]),
        text(&job["upload"]["upload_type"])
    );
    if let Some(result) = job["build"]["result"].as_object() {
        println!(
            "Package:  {} {}",
            text(&result["name"]),
            text(&result["version"])
        );
    }
    println!("Created:  {}", text(&job["created_at"]));
}

fn summary_line(job: &Value) -> String {
    let package = job["build"]["result"]["name"].as_str().unwrap_or("-");
    format!(
        "{}  {:<9}  {:<24}  {}",
        text(&job["id"]),
        text(&job["state"]),
        package,
        text(&job["created_at"])
    )
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
