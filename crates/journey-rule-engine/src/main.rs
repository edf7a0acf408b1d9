//! 旅程规则引擎命令行工具
//!
//! - `validate`：编译规则文件并报告定义错误
//! - `evaluate`：加载规则和旅程，针对给定上下文评估并输出结果

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use journey_shared::config::AppConfig;
use journey_shared::observability;
use rule_engine::{
    ContextSchema, EvaluationContext, InMemoryJourneyRepository, Journey, RuleCompiler,
    RuleDefinition, RuleEngine, RuleStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const SERVICE_NAME: &str = "journey-rule-engine";

/// Journey rule engine toolchain.
#[derive(Parser)]
#[command(name = "journey-rule-engine", version, about = "Evaluate onboarding journey rules")]
struct Cli {
    /// Context schema JSON used to type-check rule fields
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every rule in a file and report definition errors
    Validate {
        /// Rules JSON array (defaults to rule_engine.rules_path)
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Evaluate a journey against a context
    Evaluate {
        /// Rules JSON array (defaults to rule_engine.rules_path)
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Journey JSON file
        #[arg(long, conflicts_with = "journey_id")]
        journey: Option<PathBuf>,
        /// Journey id to look up in the journeys file
        #[arg(long)]
        journey_id: Option<String>,
        /// Journeys JSON array (defaults to rule_engine.journeys_path)
        #[arg(long)]
        journeys: Option<PathBuf>,
        /// Context JSON file
        #[arg(long)]
        context: PathBuf,
        /// Record condition evaluation traces
        #[arg(long)]
        trace: bool,
        /// Print the full evaluation report instead of the result only
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    observability::init(&config.service_name, &config.observability)?;

    let compiler = build_compiler(&config, cli.schema.as_deref())?;

    match cli.command {
        Commands::Validate { rules } => {
            let path = resolve(rules, &config.rule_engine.rules_path, "--rules")?;
            validate(compiler, &path)
        }
        Commands::Evaluate {
            rules,
            journey,
            journey_id,
            journeys,
            context,
            trace,
            report,
        } => {
            let rules_path = resolve(rules, &config.rule_engine.rules_path, "--rules")?;
            let store = RuleStore::with_compiler(compiler);
            let imported = store.load_from_json(&read(&rules_path)?)?;
            for (rule_id, error) in &imported.failed {
                warn!(rule_id = %rule_id, error = %error, "规则未加载");
            }

            let mut engine = RuleEngine::from_config(Arc::new(store), &config.rule_engine);
            if trace {
                engine = engine.with_trace();
            }

            let context = EvaluationContext::from_json(&read(&context)?)?;

            let evaluation = match (journey, journey_id) {
                (Some(path), _) => {
                    let journey = Journey::from_json(&read(&path)?)?;
                    engine.evaluate(&journey, &context)
                }
                (None, Some(journey_id)) => {
                    let path =
                        resolve(journeys, &config.rule_engine.journeys_path, "--journeys")?;
                    let repository = InMemoryJourneyRepository::new();
                    repository.load_from_json(&read(&path)?)?;
                    let engine = engine.with_journey_repository(Arc::new(repository));
                    engine.evaluate_journey(&journey_id, &context).await?
                }
                (None, None) => bail!("either --journey or --journey-id is required"),
            };

            for skipped in &evaluation.skipped {
                warn!(
                    rule_id = %skipped.rule_id,
                    stage = ?skipped.stage,
                    reason = %skipped.reason,
                    "规则已跳过"
                );
            }

            let output = if report {
                serde_json::to_string_pretty(&evaluation)?
            } else {
                serde_json::to_string_pretty(&evaluation.result)?
            };
            println!("{}", output);
            Ok(())
        }
    }
}

fn build_compiler(config: &AppConfig, schema: Option<&Path>) -> Result<RuleCompiler> {
    let mut compiler = RuleCompiler::new().with_max_depth(config.rule_engine.max_condition_depth);
    if let Some(path) = schema {
        let schema = ContextSchema::from_json(&read(path)?)?;
        info!(fields = schema.len(), "已加载上下文字段模式");
        compiler = compiler.with_schema(schema);
    }
    Ok(compiler)
}

/// 编译规则文件中的每一条规则，任一失败则返回错误
fn validate(mut compiler: RuleCompiler, path: &Path) -> Result<()> {
    let rules: Vec<RuleDefinition> = serde_json::from_str(&read(path)?)
        .with_context(|| format!("invalid rules file {}", path.display()))?;

    let total = rules.len();
    let mut failed = 0;
    for rule in rules {
        let label = format!("{} ({})", rule.name, rule.rule_id);
        match compiler.compile(rule) {
            Ok(compiled) => println!("ok      {} [{} fields]", label, compiled.required_fields.len()),
            Err(e) => {
                failed += 1;
                println!("invalid {}: {}", label, e);
            }
        }
    }

    println!("{} rules, {} invalid", total, failed);
    if failed > 0 {
        bail!("{} of {} rules failed validation", failed, total);
    }
    Ok(())
}

fn resolve(arg: Option<PathBuf>, configured: &Option<PathBuf>, flag: &str) -> Result<PathBuf> {
    match arg.or_else(|| configured.clone()) {
        Some(path) => Ok(path),
        None => bail!("{} is required (or set it in the rule_engine config)", flag),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
