//! JSON:API core CLI
//!
//! Command-line interface for checking resource definitions and running
//! requests against them with in-memory storage.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use jsonapi_core::{
    load_definition, load_json, load_json_auto, JsonApi, LoadError, MemoryStore, Method, Request,
    ATOMIC_EXTENSION, MEDIA_TYPE,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jsonapi-core")]
#[command(about = "Check JSON:API resource definitions and run requests against them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a definition document and build its registry
    Lint {
        /// Definition source: file path or URL (http:// or https://)
        definition: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Run one request against a definition backed by in-memory storage
    Request {
        /// Definition source: file path or URL (http:// or https://)
        definition: String,

        /// Request target: path with optional query string, e.g. /articles?include=author
        target: String,

        /// Fixtures seeding the store: {"<type>": [model, ...]}
        #[arg(long)]
        data: Option<String>,

        /// HTTP method
        #[arg(long, short = 'X', default_value = "GET")]
        method: String,

        /// File containing the request document
        #[arg(long)]
        body: Option<PathBuf>,

        /// Extra header, as "Name: value" (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Lint { definition, json } => run_lint(&definition, json),
        Commands::Request {
            definition,
            target,
            data,
            method,
            body,
            headers,
            pretty,
        } => run_request(RequestArgs {
            definition,
            target,
            data,
            method,
            body,
            headers,
            pretty,
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_lint(source: &str, json_output: bool) -> Result<(), u8> {
    let store = MemoryStore::new();
    match load_definition(source, |name| store.adapter(name).into_arc()) {
        Ok(definition) => {
            let resources: Vec<&str> = definition.registry.names().collect();
            if json_output {
                let output = serde_json::json!({ "valid": true, "resources": resources });
                println!("{}", output);
            } else {
                println!("Valid ({} resource types: {})", resources.len(), resources.join(", "));
            }
            Ok(())
        }
        Err(LoadError::InvalidDefinition { errors }) => {
            if json_output {
                let output = serde_json::json!({ "valid": false, "errors": errors });
                println!("{}", output);
            } else {
                eprintln!("Definition failed validation:");
                for error in &errors {
                    eprintln!("  {}", error);
                }
            }
            Err(2)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

struct RequestArgs {
    definition: String,
    target: String,
    data: Option<String>,
    method: String,
    body: Option<PathBuf>,
    headers: Vec<String>,
    pretty: bool,
}

fn run_request(args: RequestArgs) -> Result<(), u8> {
    let store = match &args.data {
        Some(source) => {
            let fixtures = load_json_auto(source).map_err(|e| {
                eprintln!("Error: loading fixtures: {}", e);
                e.exit_code() as u8
            })?;
            MemoryStore::from_fixtures(&fixtures).map_err(|e| {
                eprintln!("Error: loading fixtures: {}", e);
                2u8
            })?
        }
        None => MemoryStore::new(),
    };

    let definition = load_definition(&args.definition, |name| store.adapter(name).into_arc())
        .map_err(|e| {
            eprintln!("Error: loading definition: {}", e);
            if let LoadError::InvalidDefinition { errors } = &e {
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            e.exit_code() as u8
        })?;
    let atomic_path = definition.config.atomic_path.clone();
    let api = JsonApi::new(definition.registry, definition.config).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut request = Request::new(Method::parse(&args.method), &args.target);
    if let Some(path) = &args.body {
        let body = load_json(path).map_err(|e| {
            eprintln!("Error: loading body: {}", e);
            e.exit_code() as u8
        })?;
        let content_type = if request.path == atomic_path {
            format!("{}; ext=\"{}\"", MEDIA_TYPE, ATOMIC_EXTENSION)
        } else {
            MEDIA_TYPE.to_string()
        };
        request = request
            .with_header("Content-Type", content_type)
            .with_body(body);
    }
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            eprintln!("Error: header must look like \"Name: value\", got \"{}\"", header);
            return Err(2);
        };
        request = request.with_header(name.trim(), value.trim());
    }

    let response = api.handle(&request);
    eprintln!("HTTP {}", response.status);
    for (name, value) in &response.headers {
        eprintln!("{}: {}", name, value);
    }
    if let Some(body) = &response.body {
        let output = if args.pretty {
            serde_json::to_string_pretty(body)
        } else {
            serde_json::to_string(body)
        }
        .map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    }

    if response.status >= 400 {
        Err(1)
    } else {
        Ok(())
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}
