// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Diagnostic CLI for form expressions
//!
//! Evaluates, normalizes and parses rule expressions, and resolves the
//! features of a field description against a model.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use formpath::features::resolve_feature_set;
use formpath::{
    EngineConfig, ExecutionContext, ExpressionEngine, FieldDescription, FieldPath, FunctionRegistry,
    Value, get_control_features, normalize, parse,
};
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{self, Read};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "formpath")]
#[command(about = "Evaluate and inspect schema-driven form expressions")]
#[command(version)]
struct Cli {
    /// JSON engine configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression against a model
    Eval {
        /// Expression to evaluate
        expression: String,
        /// JSON model file (reads from stdin when `-` is given)
        #[arg(short, long)]
        model: Option<String>,
        /// JSON file with the host global object (`G/`)
        #[arg(short, long)]
        global: Option<String>,
        /// Scope relative references resolve against
        #[arg(short, long, default_value = "")]
        scope: String,
        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Rewrite relative path references into absolute `this.` paths
    Normalize {
        /// Expression to rewrite
        expression: String,
        /// Scope relative references resolve against
        #[arg(short, long, default_value = "")]
        scope: String,
    },
    /// Parse an expression and print its syntax tree
    Parse {
        /// Expression to parse
        expression: String,
        /// Suppress informational messages
        #[arg(short, long)]
        quiet: bool,
    },
    /// Resolve the features of a field description
    Features {
        /// JSON file with a field description, or a bare rule set with `--path`
        description: String,
        /// Field path when the file holds only rules
        #[arg(long)]
        path: Option<String>,
        /// JSON model file
        #[arg(short, long)]
        model: Option<String>,
        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn main() {
    human_panic::setup_panic!();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{} {err:#}", "error:".red().bold());
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = ExpressionEngine::new(Arc::new(FunctionRegistry::standard()), &config);

    match cli.command {
        Commands::Eval {
            expression,
            model,
            global,
            scope,
            pretty,
        } => handle_eval(&engine, &expression, model.as_deref(), global.as_deref(), &scope, pretty),
        Commands::Normalize { expression, scope } => {
            let scope = FieldPath::parse(&scope)?;
            println!("{}", normalize(&expression, &scope)?);
            Ok(())
        }
        Commands::Parse { expression, quiet } => handle_parse(&expression, quiet),
        Commands::Features {
            description,
            path,
            model,
            pretty,
        } => handle_features(&engine, &description, path.as_deref(), model.as_deref(), pretty),
    }
}

fn handle_eval(
    engine: &ExpressionEngine,
    expression: &str,
    model: Option<&str>,
    global: Option<&str>,
    scope: &str,
    pretty: bool,
) -> Result<()> {
    let model = read_json(model)?;
    let global = global.map(|path| read_json(Some(path))).transpose()?;
    let ctx = ExecutionContext::new(&model)
        .with_global(global.as_ref())
        .with_scope(FieldPath::parse(scope)?);

    let value = engine
        .try_evaluate(expression, &ctx)
        .with_context(|| format!("cannot evaluate '{expression}'"))?;
    println!("{}", render(&value, pretty)?);
    Ok(())
}

fn handle_parse(expression: &str, quiet: bool) -> Result<()> {
    let ast = parse(expression).with_context(|| format!("cannot parse '{expression}'"))?;
    if quiet {
        println!("OK");
    } else {
        println!("{} {}", "✓".green(), ast);
        println!("{ast:#?}");
    }
    Ok(())
}

fn handle_features(
    engine: &ExpressionEngine,
    file: &str,
    path: Option<&str>,
    model: Option<&str>,
    pretty: bool,
) -> Result<()> {
    let raw = read_json(Some(file))?;
    let model = model.map(|m| read_json(Some(m))).transpose()?.unwrap_or(JsonValue::Null);
    let ctx = ExecutionContext::new(&model);

    let features = match path {
        Some(path) => {
            let rules = serde_json::from_value(raw).context("invalid rule set")?;
            let scope = FieldPath::parse(path)?.parent().unwrap_or_default();
            resolve_feature_set(engine, &rules, &ctx.with_scope(scope))
        }
        None => {
            let mut description: FieldDescription =
                serde_json::from_value(raw).context("invalid field description")?;
            description.fill_name();
            get_control_features(engine, &description, &ctx)
        }
    };

    if features.is_empty() {
        eprintln!("{}", "no feature resolved".yellow());
    }
    let object = Value::Object(features);
    println!("{}", render(&object, pretty)?);
    Ok(())
}

fn read_json(path: Option<&str>) -> Result<JsonValue> {
    let text = match path {
        None => return Ok(JsonValue::Null),
        Some("-") => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("cannot read stdin")?;
            buffer
        }
        Some(path) => fs::read_to_string(path).with_context(|| format!("cannot read '{path}'"))?,
    };
    serde_json::from_str(&text).context("invalid JSON")
}

fn render(value: &Value, pretty: bool) -> Result<String> {
    let Some(json) = value.to_json() else {
        return Ok("undefined".dimmed().to_string());
    };
    Ok(if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    })
}
