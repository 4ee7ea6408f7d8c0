use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use acops::config::Settings;
use acops::deploy::{self, CloudContext, DeployOutcome, DeployRequest};
use acops::openapi::RpcClient;
use acops::oss::OssClient;
use acops::{archive, ecs, local, project, synth};

#[derive(Debug, Parser)]
#[command(name = "acops", version, about = "Alibaba Cloud application deploy and ops")]
pub struct RootCmd {
    /// Settings file (defaults to `$ACOPS_CONFIG`, then `~/.acops/config.yaml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `acops=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Project root holding `.code_deploy/` (discovered when omitted)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Region of the orchestration API
    #[arg(long, global = true, env = "ACOPS_MANAGEMENT_REGION")]
    pub management_region: Option<String>,

    /// Region of the artifact bucket
    #[arg(long, global = true, env = "ACOPS_OSS_REGION")]
    pub oss_region: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List an artifact and print the start/stop commands it would get (no cloud access)
    Inspect {
        artifact: PathBuf,

        /// docker, java, python, nodejs, golang, nginx or git
        #[arg(short = 'l', long)]
        language: String,

        /// Application name (used for container names)
        #[arg(long, default_value = "app")]
        name: String,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Upload an artifact and deploy it to ECS instances
    Deploy {
        /// Application name
        #[arg(long)]
        name: String,

        /// Region of the target instances
        #[arg(long)]
        region: Option<String>,

        /// Application group name
        #[arg(long)]
        group: String,

        /// Artifact to deploy (tar.gz, tar, zip or a single file)
        #[arg(long)]
        file: PathBuf,

        /// Object key for the upload (defaults to the file name)
        #[arg(long)]
        object_name: Option<String>,

        #[arg(short = 'l', long)]
        language: String,

        #[arg(long)]
        port: u16,

        /// Start command; synthesized from the artifact when omitted
        #[arg(long)]
        start: Option<String>,

        /// Stop command; synthesized from the runtime when omitted
        #[arg(long)]
        stop: Option<String>,

        #[arg(short = 'i', long = "instance-id")]
        instance_ids: Vec<String>,
    },

    /// Show the record of the last deploy from this project
    LastDeployment,

    /// Show the deploy status of an application group
    Status {
        #[arg(long)]
        name: String,

        #[arg(long)]
        group: String,
    },

    /// Describe ECS instances
    DescribeInstances {
        #[arg(long)]
        region: Option<String>,

        #[arg(short = 'i', long = "instance-id", required = true)]
        instance_ids: Vec<String>,
    },

    /// Detect the build and deploy stack of a directory
    Analyze {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("render JSON")?);
    Ok(())
}

fn load_settings(root: &RootCmd) -> Result<Settings> {
    let mut settings = Settings::load(root.config.as_deref())?;
    if let Some(r) = &root.management_region {
        settings.management_region = r.clone();
    }
    if let Some(r) = &root.oss_region {
        settings.oss_region = r.clone();
    }
    Ok(settings)
}

pub async fn run(root: RootCmd) -> Result<()> {
    let settings = load_settings(&root)?;
    match root.cmd {
        Command::Inspect {
            artifact,
            language,
            name,
            port,
        } => {
            let runtime = language.parse::<synth::Runtime>().ok();
            if runtime.is_none() {
                eprintln!("Note: unknown language `{language}`; only a generic stop command applies.");
            }
            let inspected = archive::inspect(&artifact).await?;
            let synthesis = synth::synthesize(&inspected, runtime, &name, port);
            print_json(&json!({
                "artifact": inspected,
                "runtime": runtime,
                "index": synthesis.index,
                "start": synthesis.start,
                "stop": synthesis.stop,
            }))
        }

        Command::Deploy {
            name,
            region,
            group,
            file,
            object_name,
            language,
            port,
            start,
            stop,
            instance_ids,
        } => {
            let rpc = RpcClient::from_settings(&settings)?;
            let oss = OssClient::new(&settings, &settings.oss_region)?;
            let cloud = CloudContext {
                settings: &settings,
                oos: &rpc,
                ecs: &rpc,
                oss: &oss,
            };
            let req = DeployRequest {
                name,
                deploy_region_id: region.unwrap_or_else(|| settings.default_region.clone()),
                application_group_name: group,
                object_name,
                file_path: file,
                deploy_language: language,
                port,
                project_path: root.project,
                application_start: start,
                application_stop: stop,
                instance_ids,
            };
            let outcome = deploy::code_deploy(&cloud, req).await?;
            print_json(&outcome)?;
            match outcome {
                DeployOutcome::Deployed(_) => Ok(()),
                DeployOutcome::Rejected(_) => {
                    anyhow::bail!("deploy not started: {}", outcome.error_code().unwrap_or("rejected"))
                }
            }
        }

        Command::LastDeployment => {
            let layout = project::load_layout(root.project)?;
            print_json(&deploy::last_deployment(&layout)?)
        }

        Command::Status { name, group } => {
            let rpc = RpcClient::from_settings(&settings)?;
            let status =
                deploy::deploy_status(&rpc, &settings.management_region, &name, &group).await?;
            print_json(&status)
        }

        Command::DescribeInstances {
            region,
            instance_ids,
        } => {
            let rpc = RpcClient::from_settings(&settings)?;
            let region = region.unwrap_or_else(|| settings.default_region.clone());
            let doc = ecs::describe_instances_raw(&rpc, &region, &instance_ids).await?;
            print_json(&doc)
        }

        Command::Analyze { dir } => print_json(&local::analyze_deploy_stack(&dir)?),

        Command::Completion { shell } => {
            let mut cmd = RootCmd::command();
            clap_complete::generate(shell, &mut cmd, "acops", &mut std::io::stdout());
            Ok(())
        }
    }
}
