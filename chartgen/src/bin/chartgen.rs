//! Print every chart the configured templates yield for a metric catalog.

#![allow(clippy::print_stdout)]

use std::{
    env,
    fmt::{self, Display},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use chartgen::{
    RenderedChart, StaticCatalog, catalog,
    config::{self, Config},
};
use clap::{Args, Parser, Subcommand};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Failed to load chartgen config: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to load metric catalog: {0}")]
    Catalog(#[from] catalog::Error),
    #[error("Failed to render chart: {0}")]
    Render(#[from] chartgen_template::Error),
    #[error("Failed to serialize chart: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No template named {0:?} is configured")]
    UnknownTemplate(String),
}

fn default_config_path() -> String {
    "/etc/chartgen/chartgen.yaml".to_string()
}

#[derive(Default, Clone, Debug)]
struct CliKeyValues {
    inner: FxHashMap<String, String>,
}

impl CliKeyValues {
    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Pairs ordered by key.
    fn into_filter(self) -> Vec<(String, String)> {
        let mut filter: Vec<(String, String)> = self.inner.into_iter().collect();
        filter.sort();
        filter
    }
}

impl Display for CliKeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for (k, v) in &self.inner {
            write!(f, "{k}={v},")?;
        }
        Ok(())
    }
}

impl FromStr for CliKeyValues {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // A key is a macro name, `[[:alpha:]_][[:alnum:]_.-]*`, and is always
        // followed by '='. Pairs are delimited by ',' but ',' may also appear
        // in a value, so keys are found first and values are whatever lies
        // between them.
        static RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"([[:alpha:]_][[:alnum:]_.\-]*)=").expect("Invalid regex pattern provided")
        });

        let mut pairs = FxHashMap::default();

        for cap in RE.captures_iter(input) {
            let key = cap[1].to_string();
            let start = cap.get(0).map_or(input.len(), |m| m.end());

            // Find the next key or run into the end of the input.
            let end = RE.find_at(input, start).map_or(input.len(), |m| m.start());

            let value = input[start..end].trim_end_matches(',').to_string();
            pairs.insert(key, value);
        }

        Ok(Self { inner: pairs })
    }
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one JSON line per chart
    Generate(GenerateArgs),
    /// Validate configuration and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct GenerateArgs {
    /// path on disk to the configuration file or directory
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// path on disk to the metric name list, one name per line
    #[clap(long)]
    metrics_path: PathBuf,
    /// only generate charts for the template with this name
    #[clap(long)]
    template: Option<String>,
    /// macro values every curve is pinned to, format KEY=VAL,KEY2=VAL
    #[clap(long)]
    filter: Option<CliKeyValues>,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file or directory
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config(config_path: &str) -> Result<Config, Error> {
    let config = if let Ok(env_var_value) = env::var("CHARTGEN_CONFIG") {
        debug!("Using config from env var 'CHARTGEN_CONFIG'");
        config::parse_config(&env_var_value)
    } else {
        debug!("Attempting to load configuration from: {config_path}");
        config::load_config_from_path(Path::new(config_path))
    };

    config.map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })
}

fn generate(
    config: &Config,
    catalog: &StaticCatalog,
    template: Option<&str>,
    filter: &[(String, String)],
) -> Result<Vec<RenderedChart>, Error> {
    let templates = match template {
        Some(name) => {
            let template = config
                .template(name)
                .ok_or_else(|| Error::UnknownTemplate(name.to_string()))?;
            vec![template.build().map_err(config::Error::from)?]
        }
        None => config.build_templates()?,
    };

    let mut rendered = Vec::new();
    for template in &templates {
        let before = rendered.len();
        for chart in template.charts(catalog, filter)? {
            rendered.push(chart.render()?);
        }
        info!(
            "Template {} yields {} charts",
            template.name(),
            rendered.len() - before
        );
    }
    Ok(rendered)
}

fn run_generate(args: GenerateArgs) -> Result<(), Error> {
    let config = load_config(&args.config_path)?;
    let catalog = StaticCatalog::from_path(&args.metrics_path)?;
    info!(
        "Loaded {} templates and {} metric names",
        config.templates.len(),
        catalog.len()
    );

    let filter = args.filter.unwrap_or_default();
    debug!("Filter: {filter}");
    let rendered = generate(
        &config,
        &catalog,
        args.template.as_deref(),
        &filter.into_filter(),
    )?;

    for chart in &rendered {
        println!("{}", serde_json::to_string(chart)?);
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting chartgen {version}.");

    match Cli::parse().command {
        Commands::Generate(args) => run_generate(args),
        Commands::ConfigCheck(args) => {
            load_config(&args.config_path)?;
            info!("Configuration is valid");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CONFIG: &str = r#"
templates:
  - name: cpu
    curves:
      - name: user
        metric: "servers.$host$.cpu.user"
        function: "alias($metric$, '$host$ user')"
      - name: system
        metric: "servers.$host$.cpu.system"
    url_params:
      title: "CPU on $host$"
  - name: disk
    curves:
      - name: used
        metric: "servers.$host$.disk.$mount$.used"
"#;

    const METRICS: &str = "\
servers.web1.cpu.user
servers.web1.cpu.system
servers.web2.cpu.user
servers.web2.cpu.system
servers.web1.disk.root.used
";

    #[test]
    fn cli_key_values_deserializes_empty_string_to_empty_set() {
        let val = "";
        let deser = CliKeyValues::from_str(val);
        let deser = deser
            .expect("String could not be converted into valid CliKeyValues")
            .to_string();
        assert_eq!("", deser);
    }

    #[test]
    fn cli_key_values_deserializes_dotted_keys() {
        let val = "host.name=web1,service.name=load";
        let deser =
            CliKeyValues::from_str(val).expect("String cannot be converted into CliKeyValues");

        assert_eq!(deser.get("host.name"), Some("web1"));
        assert_eq!(deser.get("service.name"), Some("load"));
        assert_eq!(
            deser.into_filter(),
            [
                ("host.name".to_string(), "web1".to_string()),
                ("service.name".to_string(), "load".to_string()),
            ]
        );
    }

    #[test]
    fn cli_key_values_deserializes_trailing_comma_kv_list() {
        let val = "host=web1,";
        let deser =
            CliKeyValues::from_str(val).expect("String cannot be converted into CliKeyValues");

        assert_eq!(deser.get("host"), Some("web1"));
    }

    #[test]
    fn cli_key_values_keeps_commas_inside_values() {
        let val = "mount=/,/var,host=web1";
        let deser =
            CliKeyValues::from_str(val).expect("String cannot be converted into CliKeyValues");

        assert_eq!(deser.get("mount"), Some("/,/var"));
        assert_eq!(deser.get("host"), Some("web1"));
    }

    #[test]
    fn generate_parses_cli_arguments() {
        let cli = Cli::parse_from([
            "chartgen",
            "generate",
            "--config-path=/tmp/chartgen.yaml",
            "--metrics-path=/tmp/metrics.txt",
            "--template=cpu",
            "--filter=host=web1",
        ]);
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate subcommand");
        };
        assert_eq!(args.template.as_deref(), Some("cpu"));
        assert_eq!(args.metrics_path, PathBuf::from("/tmp/metrics.txt"));
        assert_eq!(
            args.filter.expect("filter given").get("host"),
            Some("web1")
        );
    }

    #[test]
    fn generate_renders_every_template() {
        let config = config::parse_config(CONFIG).expect("valid config");
        let catalog = StaticCatalog::parse(METRICS);

        let rendered = generate(&config, &catalog, None, &[]).expect("generation succeeds");
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].targets[0], "alias(servers.web1.cpu.user, 'web1 user')");
        assert_eq!(rendered[0].targets[1], "servers.web1.cpu.system");
        assert_eq!(
            rendered[1].url_params.get("title").map(String::as_str),
            Some("CPU on web2")
        );
        assert_eq!(rendered[2].template, "disk");
    }

    #[test]
    fn generate_honours_template_and_filter() {
        let config = config::parse_config(CONFIG).expect("valid config");
        let catalog = StaticCatalog::parse(METRICS);
        let filter = [("host".to_string(), "web2".to_string())];

        let rendered =
            generate(&config, &catalog, Some("cpu"), &filter).expect("generation succeeds");
        assert_eq!(rendered.len(), 1);
        assert_eq!(
            rendered[0].metrics.get("user").map(String::as_str),
            Some("servers.web2.cpu.user")
        );

        let unknown = generate(&config, &catalog, Some("memory"), &[]);
        assert!(matches!(unknown, Err(Error::UnknownTemplate(name)) if name == "memory"));
    }

    #[test]
    fn rendered_charts_serialize_as_json_lines() {
        let config = config::parse_config(CONFIG).expect("valid config");
        let mut metrics = tempfile::NamedTempFile::new().expect("temp file could not be created");
        metrics
            .write_all(METRICS.as_bytes())
            .expect("write failed");
        let catalog = StaticCatalog::from_path(metrics.path()).expect("catalog loads");

        let rendered = generate(&config, &catalog, Some("disk"), &[]).expect("generation succeeds");
        let line = serde_json::to_string(&rendered[0]).expect("serializable");
        assert_eq!(
            line,
            r#"{"template":"disk","metrics":{"used":"servers.web1.disk.root.used"},"targets":["servers.web1.disk.root.used"],"url_params":{}}"#
        );
    }
}
