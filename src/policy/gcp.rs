use super::violation;
use crate::config::GcpEnvPolicy;
use crate::constants::{ENV_DEPLOYMENT_ENVIRONMENT, ENV_IDENTITY_SCOPE, GCP_POLICY_VERSION};
use crate::error::{AttestationError, Result};
use crate::types::gcp::{Environment, GcpTokenPayload, IdentityScope, WorkloadScope};
use crate::types::{EnclaveId, Platform};

/// Outcome of a passing Confidential Space policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpPolicyResult {
    pub enclave_id: EnclaveId,
    pub scope: WorkloadScope,
}

/// Enforce the Confidential Space workload policy.
///
/// The identifier covers the policy version, the debug flag and the image
/// digest only. Env overrides, including the API token secret name, do not
/// feed it.
pub fn validate(payload: &GcpTokenPayload, env_policy: &GcpEnvPolicy) -> Result<GcpPolicyResult> {
    if !payload.is_confidential_space_software() {
        return Err(violation(
            Platform::Gcp,
            format!("software {:?} is not Confidential Space", payload.software_name),
        ));
    }

    let debug = payload.is_debug_mode();
    if !debug && !payload.is_stable_version() {
        return Err(violation(Platform::Gcp, "Confidential Space image is not STABLE"));
    }

    if !payload.is_restart_policy_never() {
        return Err(violation(
            Platform::Gcp,
            format!("restart policy {:?} is not Never", payload.restart_policy),
        ));
    }

    if !payload.cmd_overrides.is_empty() {
        return Err(violation(Platform::Gcp, "container command is overridden"));
    }

    check_env_overrides(payload, env_policy)?;

    let environment = parse_override::<Environment>(payload, ENV_DEPLOYMENT_ENVIRONMENT)?;
    let identity_scope = parse_override::<IdentityScope>(payload, ENV_IDENTITY_SCOPE)?;

    // Without a digest every workload would collapse onto one identifier.
    if payload.workload_image_digest.is_empty() {
        return Err(violation(Platform::Gcp, "workload image digest is missing"));
    }

    let preimage = format!("{GCP_POLICY_VERSION},{debug},{}", payload.workload_image_digest);
    Ok(GcpPolicyResult {
        enclave_id: EnclaveId::digest_of(preimage.as_bytes()),
        scope: WorkloadScope {
            environment,
            identity_scope,
        },
    })
}

fn check_env_overrides(payload: &GcpTokenPayload, env_policy: &GcpEnvPolicy) -> Result<()> {
    let env = &payload.env_overrides;
    if env.is_empty() {
        return Err(violation(Platform::Gcp, "env overrides are empty"));
    }

    if let Some(missing) = env_policy.required.iter().find(|key| !env.contains_key(*key)) {
        return Err(violation(
            Platform::Gcp,
            format!("required env override {missing} is missing"),
        ));
    }

    // An unparseable environment gets no optional keys; it is rejected below.
    let environment = env
        .get(ENV_DEPLOYMENT_ENVIRONMENT)
        .and_then(|value| value.parse::<Environment>().ok());
    let allowed = |key: &str| {
        env_policy.required.contains(key)
            || environment.is_some_and(|e| env_policy.optional_for(e).any(|k| k == key))
    };
    if let Some(unexpected) = env.keys().find(|key| !allowed(key.as_str())) {
        return Err(violation(
            Platform::Gcp,
            format!("env override {unexpected} is not allowed"),
        ));
    }

    Ok(())
}

fn parse_override<T>(payload: &GcpTokenPayload, key: &str) -> Result<T>
where
    T: std::str::FromStr<Err = AttestationError>,
{
    let value = payload
        .env_overrides
        .get(key)
        .ok_or_else(|| {
            violation(Platform::Gcp, format!("required env override {key} is missing"))
        })?;
    value.parse::<T>().map_err(|e| match e {
        AttestationError::PolicyViolation(reason) => violation(Platform::Gcp, reason),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::ErrorKind;

    const DIGEST: &str = "sha256:4d1f3c5e6b0b2c8f4a1e8e1c9d7a6b5c4d3e2f1a0b9c8d7e6f5a4b3c2d1e0f9a";

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn prod_payload() -> GcpTokenPayload {
        GcpTokenPayload {
            debug_status: "disabled-since-boot".into(),
            software_name: "CONFIDENTIAL_SPACE".into(),
            software_version: Some("231201".into()),
            supported_attributes: vec!["STABLE".into()],
            workload_image_reference: "us-docker.pkg.dev/uid2/operator:5.0".into(),
            workload_image_digest: DIGEST.into(),
            cmd_overrides: vec![],
            env_overrides: env(&[
                ("DEPLOYMENT_ENVIRONMENT", "prod"),
                ("IDENTITY_SCOPE", "uid2"),
                ("API_TOKEN_SECRET_NAME", "k"),
            ]),
            restart_policy: "Never".into(),
            zone: None,
        }
    }

    #[test]
    fn production_workload_passes() {
        let payload = prod_payload();
        assert!(!payload.is_debug_mode());

        let result = validate(&payload, &GcpEnvPolicy::default()).unwrap();
        assert_eq!(result.scope.environment, Environment::Prod);
        assert_eq!(result.scope.identity_scope, IdentityScope::Uid2);
        assert_eq!(
            result.enclave_id,
            EnclaveId::digest_of(format!("1,false,{DIGEST}").as_bytes())
        );
    }

    #[test]
    fn debug_workload_gets_a_different_identifier() {
        let prod = validate(&prod_payload(), &GcpEnvPolicy::default()).unwrap();

        let mut payload = prod_payload();
        payload.debug_status = String::new();
        assert!(payload.is_debug_mode());
        let debug = validate(&payload, &GcpEnvPolicy::default()).unwrap();

        assert_eq!(payload.workload_image_digest, DIGEST);
        assert_ne!(debug.enclave_id, prod.enclave_id);
        assert_eq!(
            debug.enclave_id,
            EnclaveId::digest_of(format!("1,true,{DIGEST}").as_bytes())
        );
    }

    #[test]
    fn debug_workload_skips_stable_requirement() {
        let mut payload = prod_payload();
        payload.supported_attributes.clear();
        assert!(validate(&payload, &GcpEnvPolicy::default()).is_err());

        payload.debug_status = "enabled".into();
        assert!(validate(&payload, &GcpEnvPolicy::default()).is_ok());
    }

    #[test]
    fn identifier_ignores_api_token_and_scope() {
        let a = validate(&prod_payload(), &GcpEnvPolicy::default()).unwrap();
        let mut payload = prod_payload();
        payload.env_overrides = env(&[
            ("DEPLOYMENT_ENVIRONMENT", "PROD"),
            ("IDENTITY_SCOPE", "euid"),
            ("API_TOKEN_SECRET_NAME", "another-operator"),
        ]);
        let b = validate(&payload, &GcpEnvPolicy::default()).unwrap();
        assert_eq!(a.enclave_id, b.enclave_id);
        assert_eq!(b.scope.identity_scope, IdentityScope::Euid);
    }

    #[test]
    fn integ_workload_may_carry_optional_urls() {
        let mut payload = prod_payload();
        payload.env_overrides = env(&[
            ("DEPLOYMENT_ENVIRONMENT", "integ"),
            ("IDENTITY_SCOPE", "uid2"),
            ("API_TOKEN_SECRET_NAME", "k"),
            ("CORE_BASE_URL", "https://core.integ.example"),
            ("OPTOUT_BASE_URL", "https://optout.integ.example"),
        ]);
        let result = validate(&payload, &GcpEnvPolicy::default()).unwrap();
        assert_eq!(result.scope.environment, Environment::Integ);
    }

    #[test]
    fn each_rule_rejects_independently() {
        let mutations: Vec<(&str, fn(&mut GcpTokenPayload))> = vec![
            ("swname", |p| p.software_name = "COS".into()),
            ("stable", |p| p.supported_attributes = vec!["LATEST".into()]),
            ("restart", |p| p.restart_policy = "Always".into()),
            ("cmd", |p| p.cmd_overrides = vec!["sh".into()]),
            ("empty env", |p| p.env_overrides.clear()),
            ("no environment", |p| {
                p.env_overrides.remove("DEPLOYMENT_ENVIRONMENT");
            }),
            ("no scope", |p| {
                p.env_overrides.remove("IDENTITY_SCOPE");
            }),
            ("no api key", |p| {
                p.env_overrides.remove("API_TOKEN_SECRET_NAME");
            }),
            ("extra key", |p| {
                p.env_overrides.insert("LOG_LEVEL".into(), "debug".into());
            }),
            ("prod with integ url", |p| {
                p.env_overrides
                    .insert("CORE_BASE_URL".into(), "https://core.example".into());
            }),
            ("unknown environment", |p| {
                p.env_overrides
                    .insert("DEPLOYMENT_ENVIRONMENT".into(), "staging".into());
            }),
            ("unknown scope", |p| {
                p.env_overrides.insert("IDENTITY_SCOPE".into(), "uid3".into());
            }),
            ("no image digest", |p| p.workload_image_digest.clear()),
        ];

        for (name, mutate) in mutations {
            let mut payload = prod_payload();
            mutate(&mut payload);
            let err = validate(&payload, &GcpEnvPolicy::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PolicyViolation, "{name}");
        }
    }

    #[test]
    fn env_table_comes_from_configuration() {
        let mut payload = prod_payload();
        payload
            .env_overrides
            .insert("CORE_BASE_URL".into(), "https://core.example".into());

        let mut policy = GcpEnvPolicy::default();
        assert!(validate(&payload, &policy).is_err());

        policy
            .optional
            .entry(Environment::Prod)
            .or_default()
            .insert("CORE_BASE_URL".into());
        assert!(validate(&payload, &policy).is_ok());
    }
}
