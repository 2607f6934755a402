//! TLS, SASL and protocol-version options for broker clients.
//!
//! The options are appended to an [`rdkafka::ClientConfig`] as librdkafka
//! settings; the clusters' security posture is decided entirely here.

use rdkafka::ClientConfig;
use tracing::warn;

use crate::auth::MskIamSigner;
use crate::config::{ClusterConfig, SaslMechanism};
use crate::error::ConfigResult;

/// Apply bootstrap, TLS, SASL and version options for one cluster.
///
/// # Errors
///
/// Returns an error for incomplete or unrecognized SASL configuration.
pub fn apply(cluster: &ClusterConfig, client: &mut ClientConfig) -> ConfigResult<()> {
    client.set("bootstrap.servers", &cluster.bootstrap_servers);

    let sasl = cluster.configured_sasl()?;
    let protocol = match (cluster.tls_enabled(), sasl.is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    };
    client.set("security.protocol", protocol);

    if let Some(tls) = &cluster.tls {
        if tls.enabled {
            // Any configured material overrides the default trust store.
            if let Some(ca) = &tls.ca_cert {
                client.set("ssl.ca.location", ca.display().to_string());
            }
            if let Some(cert) = &tls.client_cert {
                client.set("ssl.certificate.location", cert.display().to_string());
            }
            if let Some(key) = &tls.client_key {
                client.set("ssl.key.location", key.display().to_string());
            }
        }
    }

    if let Some(creds) = sasl {
        client.set("sasl.mechanism", creds.mechanism.mechanism_name());
        match creds.mechanism {
            SaslMechanism::AwsMskIam => {
                // Credentials never enter the client options here; the
                // access/secret pair signs OAUTHBEARER tokens through the
                // client context's refresh callback.
            }
            _ => {
                client.set("sasl.username", &creds.username);
                client.set("sasl.password", &creds.password);
            }
        }
    }

    if let Some(version) = &cluster.max_version {
        apply_max_version(version, client);
    }

    Ok(())
}

/// Build the MSK IAM token signer for a cluster, when its SASL method
/// is aws-msk-iam.
///
/// # Errors
///
/// Returns an error for incomplete or unrecognized SASL configuration.
pub fn iam_signer(cluster: &ClusterConfig) -> ConfigResult<Option<MskIamSigner>> {
    match cluster.configured_sasl()? {
        Some(creds) if creds.mechanism == SaslMechanism::AwsMskIam => {
            Ok(Some(MskIamSigner::new(&creds)))
        }
        _ => Ok(None),
    }
}

/// Pin the maximum Kafka protocol version to negotiate.
///
/// The version string is normalized ("v3.3.0", "3_3_0" and "330" are
/// equivalent); unknown values keep the client's stable default.
fn apply_max_version(version: &str, client: &mut ClientConfig) {
    let normalized: String = version
        .to_lowercase()
        .chars()
        .filter(|c| *c != 'v' && *c != '.' && *c != '_')
        .collect();
    let pinned = match normalized.as_str() {
        "330" => Some("3.3.0"),
        "320" => Some("3.2.0"),
        "310" => Some("3.1.0"),
        "300" => Some("3.0.0"),
        "280" => Some("2.8.0"),
        "270" => Some("2.7.0"),
        "260" => Some("2.6.0"),
        _ => None,
    };
    match pinned {
        Some(fallback) => {
            client.set("api.version.request", "false");
            client.set("broker.version.fallback", fallback);
        }
        None => {
            warn!(version, "unknown max_version, using stable default");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SaslConfig, TlsConfig};

    fn setting<'a>(client: &'a ClientConfig, key: &str) -> Option<&'a str> {
        client.get(key)
    }

    #[test]
    fn test_plaintext_by_default() {
        let cluster = ClusterConfig {
            bootstrap_servers: "localhost:9092".to_string(),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "security.protocol"), Some("plaintext"));
        assert_eq!(setting(&client, "bootstrap.servers"), Some("localhost:9092"));
    }

    #[test]
    fn test_tls_without_material_uses_default_trust_store() {
        let cluster = ClusterConfig {
            tls: Some(TlsConfig {
                enabled: true,
                ..TlsConfig::default()
            }),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "security.protocol"), Some("ssl"));
        assert_eq!(setting(&client, "ssl.ca.location"), None);
    }

    #[test]
    fn test_tls_with_custom_material() {
        let cluster = ClusterConfig {
            tls: Some(TlsConfig {
                enabled: true,
                ca_cert: Some("/etc/ssl/ca.crt".into()),
                client_cert: Some("/etc/ssl/client.crt".into()),
                client_key: Some("/etc/ssl/client.key".into()),
            }),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "ssl.ca.location"), Some("/etc/ssl/ca.crt"));
        assert_eq!(
            setting(&client, "ssl.certificate.location"),
            Some("/etc/ssl/client.crt")
        );
        assert_eq!(setting(&client, "ssl.key.location"), Some("/etc/ssl/client.key"));
    }

    #[test]
    fn test_sasl_over_tls() {
        let cluster = ClusterConfig {
            tls: Some(TlsConfig {
                enabled: true,
                ..TlsConfig::default()
            }),
            sasl: Some(SaslConfig {
                sasl_method: "scram-sha-512".to_string(),
                sasl_username: "user".to_string(),
                sasl_password: "pass".to_string(),
                ..SaslConfig::default()
            }),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "security.protocol"), Some("sasl_ssl"));
        assert_eq!(setting(&client, "sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(setting(&client, "sasl.username"), Some("user"));
    }

    fn msk_iam_cluster() -> ClusterConfig {
        ClusterConfig {
            tls: Some(TlsConfig {
                enabled: true,
                ..TlsConfig::default()
            }),
            sasl: Some(SaslConfig {
                sasl_method: "aws-msk-iam".to_string(),
                sasl_username: "AKIAEXAMPLE".to_string(),
                sasl_password: "the-secret-key".to_string(),
                sasl_aws_region: "us-east-1".to_string(),
            }),
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn test_msk_iam_uses_oauthbearer_without_leaking_credentials() {
        let cluster = msk_iam_cluster();
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();

        assert_eq!(setting(&client, "security.protocol"), Some("sasl_ssl"));
        assert_eq!(setting(&client, "sasl.mechanism"), Some("OAUTHBEARER"));
        assert_eq!(setting(&client, "sasl.username"), None);
        assert_eq!(setting(&client, "sasl.password"), None);

        // Neither credential may appear in any client option; both flow
        // through the token signer instead.
        for (key, value) in client.config_map() {
            assert!(
                !value.contains("the-secret-key") && !value.contains("AKIAEXAMPLE"),
                "credential leaked into client option {key}"
            );
        }
    }

    #[test]
    fn test_iam_signer_only_built_for_msk_iam() {
        assert!(iam_signer(&msk_iam_cluster()).unwrap().is_some());

        let plain = ClusterConfig {
            sasl: Some(SaslConfig {
                sasl_method: "plain".to_string(),
                sasl_username: "user".to_string(),
                sasl_password: "pass".to_string(),
                ..SaslConfig::default()
            }),
            ..ClusterConfig::default()
        };
        assert!(iam_signer(&plain).unwrap().is_none());
        assert!(iam_signer(&ClusterConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_max_version_pins_fallback() {
        let cluster = ClusterConfig {
            max_version: Some("V3.3.0".to_string()),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "api.version.request"), Some("false"));
        assert_eq!(setting(&client, "broker.version.fallback"), Some("3.3.0"));
    }

    #[test]
    fn test_unknown_max_version_keeps_default() {
        let cluster = ClusterConfig {
            max_version: Some("9.9.9".to_string()),
            ..ClusterConfig::default()
        };
        let mut client = ClientConfig::new();
        apply(&cluster, &mut client).unwrap();
        assert_eq!(setting(&client, "broker.version.fallback"), None);
    }
}
