//! Creates a namespace with a hello-world pod, queries pods by label, and logs every
//! pod event an informer sees until told to clean up.
use anyhow::Context;
use clap::Parser;
use informer_client::{fake::FakeCluster, Api, Client, KubeClient};
use informer_core::Kind;
use informer_runtime::{Config, Informer};
use kube::config::{KubeConfigOptions, Kubeconfig};
use podwatch::{Driver, LoggingHandler, Target};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Namespace to create, and delete again on the way out
    #[arg(long, env = "PODWATCH_NAMESPACE", default_value = "aerospike")]
    namespace: String,
    /// Name of the pod to create
    #[arg(long, env = "PODWATCH_POD_NAME", default_value = "hello-world")]
    pod_name: String,
    /// Image the pod runs
    #[arg(long, env = "PODWATCH_IMAGE", default_value = "hello-world")]
    image: String,
    /// Selector for the cross-namespace pod query
    #[arg(long, env = "PODWATCH_LABEL_SELECTOR", default_value = "k8s-app=kube-dns")]
    label_selector: String,
    /// Kubeconfig to use instead of the inferred configuration
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,
    /// How long to watch before cleaning up, Ctrl-C ends it early
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    hold: Duration,
    /// How long the informer gets to stop
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    grace: Duration,
    /// Run against an in-memory cluster instead of a real one
    #[arg(long)]
    fake: bool,
    /// Log as JSON lines
    #[arg(long, env = "PODWATCH_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn target(&self) -> Target {
        Target {
            namespace: self.namespace.clone(),
            pod_name: self.pod_name.clone(),
            image: self.image.clone(),
            label_selector: self.label_selector.clone(),
        }
    }
}

fn parse_duration(arg: &str) -> Result<Duration, String> {
    let (value, unit) = match arg.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => arg.split_at(idx),
        None => (arg, "s"),
    };
    let value = value
        .parse::<u64>()
        .map_err(|_| format!("invalid duration {arg:?}, expected e.g. 500ms, 5s or 1m"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {arg:?} is too long")),
        _ => Err(format!("unknown duration unit {unit:?}, expected ms, s or m")),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

async fn connect(args: &Args) -> anyhow::Result<Client> {
    if args.fake {
        info!("using in-memory cluster");
        return Ok(FakeCluster::seeded().client());
    }
    let options = KubeConfigOptions {
        context: args.context.clone(),
        ..KubeConfigOptions::default()
    };
    let config = match (&args.kubeconfig, &args.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        (None, Some(_)) => kube::Config::from_kubeconfig(&options).await?,
        (None, None) => kube::Config::infer().await?,
    };
    let client = kube::Client::try_from(config).context("failed to create kube client")?;
    Ok(Client::new(KubeClient::new(client)))
}

async fn hold(duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("interrupted, cleaning up"),
            Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
        },
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("connecting to K8s");
    let client = connect(&args).await?;
    info!("connection established");

    let informer = Informer::new(
        Api::all(client.clone(), Kind::Pod),
        Config::default().grace_period(args.grace),
    );
    informer.add_event_handler(LoggingHandler);
    let handle = informer.spawn(CancellationToken::new());

    let driver = Driver::new(client, args.target());
    let outcome = match driver.run().await {
        Ok(_) => {
            hold(args.hold).await;
            driver.cleanup().await.context("failed to clean up")
        }
        Err(err) => Err(err).context("failed to run"),
    };

    if let Err(err) = handle.shutdown().await {
        warn!(error = %err, "informer shutdown");
    }
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "podwatch failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_and_without_units() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("5h").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn oversized_minutes_are_rejected() {
        let max = u64::MAX / 60;
        assert_eq!(parse_duration(&format!("{max}m")).unwrap(), Duration::from_secs(max * 60));
        let err = parse_duration(&format!("{}m", max + 1)).unwrap_err();
        assert!(err.contains("too long"), "{err}");
        assert!(parse_duration("18446744073709551615m").is_err());
    }

    #[test]
    fn defaults_match_the_demo() {
        let args = Args::try_parse_from(["podwatch", "--fake"]).unwrap();
        assert_eq!(args.target(), Target::default());
        assert_eq!(args.hold, Duration::from_secs(5));
        assert!(args.fake);
    }

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
