use std::{
    io::{stderr, stdin, BufRead},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::bail;
use api::{start_api, ApiContext};
use auth::{AuthConfig, AuthService};
use clap::{Parser, Subcommand};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{new_exporter, new_pipeline, WithExportConfig};
use opentelemetry_sdk::{
    runtime::Tokio,
    trace::{BatchConfig, Config, RandomIdGenerator, Sampler},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use pwd::{
    pbkdf2::{Pbkdf2PasswordEncoder, Pbkdf2PasswordEncoderArgs},
    PasswordEncoder,
};
use seed::{load_seed_file, seed_users};
use store::memory::MemoryUserStore;
use tokio::{
    select,
    signal::unix::{signal, Signal, SignalKind},
};
use tracing::{debug, info};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    fmt::layer, layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter,
};

mod api;
mod auth;
mod domain;
mod pwd;
mod seed;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.obs)?;
    match args.cmd {
        Command::Api(args) => {
            let encoder = Pbkdf2PasswordEncoder::new(args.pwd)?;
            let auth = AuthService::new(args.auth, encoder, MemoryUserStore::new());
            if let Some(path) = args.seed_file {
                let users = load_seed_file(&path)?;
                seed_users(&auth, &users).await?;
            }
            start_api(args.bind_addr, ApiContext { auth }).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Hash(args) => {
            let encoder = Pbkdf2PasswordEncoder::new(args.pwd)?;
            let secret = read_secret()?;
            println!("{}", encoder.encode(&secret)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(args) => {
            let encoder = Pbkdf2PasswordEncoder::new(args.pwd)?;
            let secret = read_secret()?;
            if encoder.verify(&args.credential, &secret)? {
                info!("secret matches credential");
                Ok(ExitCode::SUCCESS)
            } else {
                info!("secret doesn't match credential");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

const CARGO_PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Clone, Debug, Eq, Parser, PartialEq)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
    #[command(flatten)]
    obs: ObsArgs,
}

#[derive(clap::Args, Clone, Debug, Eq, PartialEq)]
struct ObsArgs {
    #[arg(
        long,
        env,
        default_value = "dashboard_auth=info,warn",
        long_help = "Log filter (https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives)"
    )]
    log_filter: String,
    #[arg(long, env, long_help = "URL to OTEL collector")]
    otel_collector_url: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Subcommand)]
enum Command {
    #[command(about = "Start API server")]
    Api(ApiArgs),
    #[command(about = "Hash a secret read from stdin")]
    Hash(HashArgs),
    #[command(about = "Check a secret read from stdin against a credential")]
    Verify(VerifyArgs),
}

#[derive(clap::Args, Clone, Debug, Eq, PartialEq)]
struct ApiArgs {
    #[command(flatten)]
    auth: AuthConfig,
    #[arg(
        long,
        env,
        default_value = "0.0.0.0:8080",
        long_help = "Address on which listen requests"
    )]
    bind_addr: SocketAddr,
    #[command(flatten)]
    pwd: Pbkdf2PasswordEncoderArgs,
    #[arg(
        long,
        env,
        long_help = "YAML file of users (name, email, plaintext password) enrolled at startup"
    )]
    seed_file: Option<PathBuf>,
}

impl Default for ApiArgs {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 8080)),
            pwd: Pbkdf2PasswordEncoderArgs::default(),
            seed_file: None,
        }
    }
}

#[derive(clap::Args, Clone, Debug, Default, Eq, PartialEq)]
struct HashArgs {
    #[command(flatten)]
    pwd: Pbkdf2PasswordEncoderArgs,
}

#[derive(clap::Args, Clone, Debug, Eq, PartialEq)]
struct VerifyArgs {
    #[arg(long, env, long_help = "Stored credential (<salt>:<key>)")]
    credential: String,
    #[command(flatten)]
    pwd: Pbkdf2PasswordEncoderArgs,
}

struct SignalListener {
    int: Signal,
    term: Signal,
}

impl SignalListener {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt())?,
            term: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        select! {
            _ = self.int.recv() => {
                debug!("sigint received");
            }
            _ = self.term.recv() => {
                debug!("sigterm received")
            }
        }
    }
}

fn init_tracing(args: ObsArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::builder().parse(args.log_filter)?;
    let sub = layer().with_writer(stderr);
    let registry = registry().with(filter).with(sub);
    if let Some(otel_url) = args.otel_collector_url {
        let res = Resource::from_schema_url(
            [
                KeyValue::new(SERVICE_NAME, CARGO_PKG_NAME),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            ],
            SCHEMA_URL,
        );
        let cfg = Config::default()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(res);
        let exp = new_exporter().tonic().with_endpoint(otel_url);
        let tracer = new_pipeline()
            .tracing()
            .with_trace_config(cfg)
            .with_batch_config(BatchConfig::default())
            .with_exporter(exp)
            .install_batch(Tokio)?;
        registry.with(OpenTelemetryLayer::new(tracer)).try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}

/// Reads the first line of stdin, without its line ending.
fn read_secret() -> anyhow::Result<String> {
    read_line(stdin().lock())
}

fn read_line<R: BufRead>(mut reader: R) -> anyhow::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        bail!("no secret on stdin");
    }
    Ok(secret.into())
}

// Tests
