// AWS Nitro: https://docs.aws.amazon.com/enclaves/latest/user/verify-root.html
// Azure MAA: https://learn.microsoft.com/en-us/azure/attestation/claim-sets
// GCP Confidential Space: https://cloud.google.com/confidential-computing/confidential-space/docs/reference/token-claims

/// AWS Nitro Enclaves root certificate (G1).
///
/// Downloaded from <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>.
/// Subject: CN = aws.nitro-enclaves, valid until 2049-10-28.
pub const AWS_NITRO_ROOT_CERT_PEM: &str = include_str!("../data/aws_nitro_root.pem");

/// COSE_Sign1 CBOR tag.
pub const COSE_SIGN1_TAG: u64 = 18;
/// COSE algorithm identifier for ECDSA w/ SHA-384.
pub const COSE_ALG_ES384: i64 = -35;
/// Context string of the COSE Sig_structure for single-signer messages.
pub const COSE_SIGNATURE1_CONTEXT: &str = "Signature1";

pub const NITRO_DIGEST_SHA384: &str = "SHA384";
pub const NITRO_MAX_PCRS: usize = 32;
pub const NITRO_MAX_CERT_CHAIN_LEN: usize = 10;
pub const NITRO_MAX_CERT_LEN: usize = 1024;
pub const NITRO_MAX_PUBLIC_KEY_LEN: usize = 1024;
pub const NITRO_MAX_USER_DATA_LEN: usize = 512;
pub const NITRO_MAX_NONCE_LEN: usize = 512;
/// Byte width of each of R and S in a P-384 signature.
pub const P384_FIELD_LEN: usize = 48;

pub const MAA_ATTESTATION_TYPE_SEVSNP: &str = "sevsnpvm";
pub const MAA_COMPLIANCE_STATUS_UVM: &str = "azure-compliant-uvm";
pub const MAA_CERTS_PATH: &str = "/certs";

pub const GCP_CONFIDENTIAL_SPACE_SWNAME: &str = "CONFIDENTIAL_SPACE";
pub const GCP_DEBUG_DISABLED: &str = "disabled-since-boot";
pub const GCP_STABLE_ATTRIBUTE: &str = "STABLE";
pub const GCP_RESTART_POLICY_NEVER: &str = "Never";
pub const GCP_ISSUER: &str = "https://confidentialcomputing.googleapis.com";
/// Default audience of tokens minted by the Confidential Space launcher.
pub const GCP_AUDIENCE: &str = "https://sts.googleapis.com";
pub const GCP_JWKS_URL: &str = "https://www.googleapis.com/service_accounts/v1/metadata/jwk/signer@confidentialspace-sign.iam.gserviceaccount.com";
/// Bumped whenever the GCP policy changes in a way that must yield new identifiers.
pub const GCP_POLICY_VERSION: u32 = 1;

pub const ENV_DEPLOYMENT_ENVIRONMENT: &str = "DEPLOYMENT_ENVIRONMENT";
pub const ENV_IDENTITY_SCOPE: &str = "IDENTITY_SCOPE";
pub const ENV_API_TOKEN_SECRET_NAME: &str = "API_TOKEN_SECRET_NAME";
pub const ENV_CORE_BASE_URL: &str = "CORE_BASE_URL";
pub const ENV_OPTOUT_BASE_URL: &str = "OPTOUT_BASE_URL";

/// Signer key sets are refetched after this many seconds.
pub const KEY_CACHE_TTL_SECS: u64 = 60 * 60;
/// A fresh key set missing the requested kid is refetched at most this often.
pub const KEY_REFETCH_MIN_INTERVAL_SECS: u64 = 5 * 60;
/// Clock skew tolerated on `exp` and `nbf`.
pub const JWT_LEEWAY_SECS: u64 = 60;
