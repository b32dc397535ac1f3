use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arrowhead_client::{
    AccessPolicyKind, ArrowheadClient, Config, ConsumeRequest, OrchestrationRequest, Service,
    ServiceInterface, ServiceResponse, handler,
};

/// Arrowhead - consume and provide services in an Arrowhead local cloud
#[derive(Parser)]
#[command(name = "arrowhead", version, about)]
struct Cli {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, env = "ARROWHEAD_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the authorization system's public key
    PublicKey,
    /// Resolve a service definition and list the providers found
    Orchestrate {
        /// Service definition
        definition: String,
        /// Accepted interface, e.g. HTTP-SECURE-JSON
        #[arg(short, long, default_value = "HTTP-SECURE-JSON")]
        interface: ServiceInterface,
        /// HTTP method used when consuming
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
    /// Resolve and consume a service, printing the response body
    Consume {
        /// Service definition
        definition: String,
        /// Accepted interface, e.g. HTTP-SECURE-JSON
        #[arg(short, long, default_value = "HTTP-SECURE-JSON")]
        interface: ServiceInterface,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// JSON body
        #[arg(short, long)]
        json: Option<String>,
    },
    /// Publish an event
    Publish {
        /// Event type
        event_type: String,
        /// Event payload
        payload: String,
    },
    /// Provide an echo service until interrupted
    EchoProvider {
        /// Service definition to register
        #[arg(long, default_value = "echo")]
        definition: String,
        /// Service URI
        #[arg(long, default_value = "echo")]
        uri: String,
        /// Access policy: NOT_SECURE, CERTIFICATE or TOKEN
        #[arg(long, default_value = "CERTIFICATE")]
        access_policy: AccessPolicyKind,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,arrowhead_client=info",
        1 => "info,arrowhead_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::PublicKey => {
            let client = ArrowheadClient::builder(config).build()?;
            println!("{}", client.fetch_authorization_key().await?);
        }
        Command::Orchestrate {
            definition,
            interface,
            method,
        } => {
            let client = ArrowheadClient::builder(config).build()?;
            let found = orchestrate(&client, &definition, &interface, &method).await?;
            println!("{found} provider(s) for {definition}");
            if let Some(rules) = client.orchestration_rules().get(&definition) {
                for rule in rules.iter() {
                    println!("  {rule}");
                }
            }
        }
        Command::Consume {
            definition,
            interface,
            method,
            json,
        } => {
            let client = ArrowheadClient::builder(config).build()?;
            orchestrate(&client, &definition, &interface, &method).await?;
            let mut request = ConsumeRequest::new();
            if let Some(json) = json {
                request = request.json(serde_json::from_str(&json)?);
            }
            let response = client.consume_service(&definition, request).await?;
            println!("{}", response.text());
        }
        Command::Publish {
            event_type,
            payload,
        } => {
            let client = ArrowheadClient::builder(config).build()?;
            client
                .publish_event(&event_type, payload, BTreeMap::new())
                .await?;
            println!("published {event_type}");
        }
        Command::EchoProvider {
            definition,
            uri,
            access_policy,
        } => {
            let interface = ServiceInterface::with_access_policy("HTTP", access_policy, "JSON");
            let service = Service::new(definition, uri, interface, access_policy);
            let client = ArrowheadClient::builder(config)
                .provided_service(
                    service,
                    "POST",
                    handler(|request| async move {
                        let body: serde_json::Value = request.json()?;
                        ServiceResponse::json(&body)
                    }),
                )
                .build()?;
            client.run_forever().await?;
        }
    }

    Ok(())
}

async fn orchestrate(
    client: &ArrowheadClient,
    definition: &str,
    interface: &ServiceInterface,
    method: &str,
) -> anyhow::Result<usize> {
    let access_policy = if interface.is_secure() {
        AccessPolicyKind::Certificate
    } else {
        AccessPolicyKind::Unrestricted
    };
    let request = OrchestrationRequest::new().interface(
        interface.protocol(),
        access_policy,
        interface.payload(),
    );
    Ok(client
        .add_orchestration_rule(definition, method, request)
        .await?)
}
