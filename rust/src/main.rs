//! Operator CLI. Each command runs the same startup path the host uses, so
//! `ensure-secret` on a fresh install provisions exactly what the first boot
//! would.

use std::env;
use std::process::ExitCode;

use mobile_auth::bootstrap::{AuthContext, Bootstrap};
use mobile_auth::config::{config_path_from_env, load_config, MobileAuthConfig};
use mobile_auth::notices::dismiss;
use mobile_auth::provisioner::SecretOutcome;
use mobile_auth::registry::ProviderRegistry;
use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Commands:\n  ensure-secret\n  issue-token <user-id>\n  validate-token <token>\n  notices\n  dismiss-notice <type>");
}

fn init_tracing(config: &MobileAuthConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn start(config: &MobileAuthConfig) -> Option<AuthContext> {
    match Bootstrap::start(config, &ProviderRegistry::new()) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            error!(error = %err, "startup failed");
            None
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::FAILURE;
    }

    let config_path = config_path_from_env();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config load failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    match args[1].as_str() {
        "ensure-secret" => {
            if args.len() != 2 {
                print_usage();
                return ExitCode::FAILURE;
            }
            let Some(ctx) = start(&config) else {
                return ExitCode::FAILURE;
            };
            let printable = match ctx.outcome() {
                SecretOutcome::Active { secret, source } => json!({
                    "status": "active",
                    "source": source,
                    "key": ctx.provisioner().options().secret_key,
                    "fingerprint": secret.fingerprint(),
                    "secret": "<redacted in output>"
                }),
                SecretOutcome::Deferred { holder } => json!({
                    "status": "deferred",
                    "holder": holder
                }),
            };
            println!("{}", serde_json::to_string_pretty(&printable).unwrap_or_default());
        }
        "issue-token" => {
            if args.len() != 3 {
                print_usage();
                return ExitCode::FAILURE;
            }
            let Some(codec) = start(&config).and_then(|ctx| ctx.codec().cloned()) else {
                eprintln!("no active signing secret");
                return ExitCode::FAILURE;
            };
            match codec.issue(&args[2]) {
                Ok(token) => println!("{token}"),
                Err(err) => {
                    eprintln!("token issue failed: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
        "validate-token" => {
            if args.len() != 3 {
                print_usage();
                return ExitCode::FAILURE;
            }
            let Some(codec) = start(&config).and_then(|ctx| ctx.codec().cloned()) else {
                eprintln!("no active signing secret");
                return ExitCode::FAILURE;
            };
            match codec.validate(&args[2]) {
                Ok(claims) => {
                    let printable = json!({
                        "valid": true,
                        "userId": claims.user_id(),
                        "iss": claims.iss,
                        "exp": claims.exp
                    });
                    println!("{}", serde_json::to_string_pretty(&printable).unwrap_or_default());
                }
                Err(err) => {
                    println!("{}", json!({ "valid": false, "error": err.to_string() }));
                    return ExitCode::FAILURE;
                }
            }
        }
        "notices" => {
            let Some(ctx) = start(&config) else {
                return ExitCode::FAILURE;
            };
            match ctx.admin_notices() {
                Ok(notices) => println!("{}", serde_json::to_string_pretty(&notices).unwrap_or_default()),
                Err(err) => {
                    eprintln!("notice lookup failed: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
        "dismiss-notice" => {
            if args.len() != 3 {
                print_usage();
                return ExitCode::FAILURE;
            }
            let Some(ctx) = start(&config) else {
                return ExitCode::FAILURE;
            };
            match dismiss(ctx.store().as_ref(), &args[2]) {
                Ok(key) => println!("{key}"),
                Err(err) => {
                    eprintln!("dismiss failed: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
        _ => {
            print_usage();
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
