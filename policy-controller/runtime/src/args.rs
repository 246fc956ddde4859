use crate::{
    admission::{Admission, DecodeFailure},
    core::{PolicyConfig, VolumePolicy},
    metrics::AdmissionMetrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "sandbox-policy",
    about = "An admission controller that keeps Jobs inside a sandboxed runtime"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "sandbox=info,warn",
        env = "SANDBOX_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The RuntimeClass that every Job must run under.
    #[clap(long, default_value = "gvisor")]
    runtime_class: String,

    /// Which pod volumes are admitted: `deny-all` or `secrets-only`.
    #[clap(long, default_value = "deny-all")]
    volume_policy: VolumePolicy,

    /// How Jobs that cannot be decoded are handled: `allow` or `deny`.
    #[clap(long, default_value = "allow")]
    decode_failure: DecodeFailure,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            runtime_class,
            volume_policy,
            decode_failure,
        } = self;

        let mut prom = <Registry>::default();
        let metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("sandbox_admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        let config = PolicyConfig::new(runtime_class).with_volumes(volume_policy);
        info!(
            runtime_class = %config.expected_runtime_class,
            volumes = %config.volumes,
            ?decode_failure,
            "Enforcing sandbox policy"
        );
        let admission = Admission::new(config, decode_failure, metrics);
        let runtime = runtime.spawn_server(admission);

        // Block the main thread on the shutdown signal. Once it fires, wait for in-flight
        // admission requests to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from([
            "sandbox-policy",
            "--server-tls-key=/certs/server-key.pem",
            "--server-tls-certs=/certs/server.pem",
        ])
        .expect("args must parse");
        assert_eq!(args.runtime_class, "gvisor");
        assert_eq!(args.volume_policy, VolumePolicy::DenyAll);
        assert_eq!(args.decode_failure, DecodeFailure::Allow);
    }

    #[test]
    fn policy_modes() {
        let args = Args::try_parse_from([
            "sandbox-policy",
            "--server-tls-key=/certs/server-key.pem",
            "--server-tls-certs=/certs/server.pem",
            "--runtime-class=kata",
            "--volume-policy=secrets-only",
            "--decode-failure=deny",
        ])
        .expect("args must parse");
        assert_eq!(args.runtime_class, "kata");
        assert_eq!(args.volume_policy, VolumePolicy::SecretsOnly);
        assert_eq!(args.decode_failure, DecodeFailure::Deny);
    }

    #[test]
    fn rejects_unknown_modes() {
        for flag in ["--volume-policy=some", "--decode-failure=maybe"] {
            let res = Args::try_parse_from([
                "sandbox-policy",
                "--server-tls-key=/certs/server-key.pem",
                "--server-tls-certs=/certs/server.pem",
                flag,
            ]);
            assert!(res.is_err(), "{flag} must be rejected");
        }
    }
}
