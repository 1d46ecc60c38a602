//! kubedriver operator - provisions the pod, service and ingress behind every WebDriverSession

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kubedriver_common::crd::WebDriverSession;
use kubedriver_common::kube_utils::{create_client, crd_yaml, ensure_crd};
use kubedriver_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use kubedriver_common::DEFAULT_NAMESPACE;
use kubedriver_operator::{DriverImages, HttpDriverClient, SessionOperatorSettings, SessionOperators};
use tokio_util::sync::CancellationToken;

/// kubedriver - runs WebDriver sessions as Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "kubedriver-operator", version, about, long_about = None)]
struct Cli {
    /// Print the WebDriverSession CRD and exit
    #[arg(long)]
    crd: bool,

    /// Namespace sessions and their children live in
    #[arg(long, env = "KUBEDRIVER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Path to a kubeconfig file; inferred when omitted
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Driver image for the fake platform
    #[arg(long, env = "KUBEDRIVER_FAKE_IMAGE")]
    fake_image: Option<String>,

    /// Driver image for Android sessions
    #[arg(long, env = "KUBEDRIVER_ANDROID_IMAGE")]
    android_image: Option<String>,

    /// Driver image for iOS sessions
    #[arg(long, env = "KUBEDRIVER_IOS_IMAGE")]
    ios_image: Option<String>,

    /// Log line format (json or text)
    #[arg(long, env = "KUBEDRIVER_LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Cli {
    fn images(&self) -> DriverImages {
        let defaults = DriverImages::default();
        DriverImages {
            fake: self.fake_image.clone().unwrap_or(defaults.fake),
            android: self.android_image.clone().unwrap_or(defaults.android),
            ios: self.ios_image.clone().unwrap_or(defaults.ios),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml::<WebDriverSession>()?);
        return Ok(());
    }

    init_telemetry(&TelemetryConfig {
        service_name: "kubedriver-operator".to_string(),
        format: cli.log_format,
    })?;

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    ensure_crd::<WebDriverSession>(&client).await?;

    let settings = SessionOperatorSettings {
        namespace: cli.namespace.clone(),
        images: cli.images(),
    };
    let driver = Arc::new(HttpDriverClient::new()?);
    let operators = SessionOperators::new(client, &settings, driver)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(cancel_on_interrupt(tokio::signal::ctrl_c(), signal));

    tracing::info!(namespace = %settings.namespace, "kubedriver operator starting");
    operators.run(shutdown).await?;
    tracing::info!("kubedriver operator stopped");
    Ok(())
}

/// Cancel `shutdown` once `interrupt` fires
///
/// If the signal handler cannot be installed the operator keeps running and
/// must be stopped externally.
async fn cancel_on_interrupt(
    interrupt: impl Future<Output = std::io::Result<()>>,
    shutdown: CancellationToken,
) {
    match interrupt.await {
        Ok(()) => {
            tracing::info!("received interrupt, shutting down");
            shutdown.cancel();
        }
        Err(e) => tracing::error!(error = %e, "failed to listen for interrupts"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_cancels_shutdown() {
        let shutdown = CancellationToken::new();
        cancel_on_interrupt(async { Ok(()) }, shutdown.clone()).await;
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn failed_signal_handler_keeps_running() {
        let shutdown = CancellationToken::new();
        let broken = async { Err(std::io::Error::other("no signal support")) };
        cancel_on_interrupt(broken, shutdown.clone()).await;
        assert!(!shutdown.is_cancelled());
    }
}
