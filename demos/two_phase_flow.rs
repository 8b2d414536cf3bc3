//! Example: Driving the two-phase attestation protocol
//!
//! Run with: RUST_LOG=debug cargo run -p devicecheck-playintegrity --example two_phase_flow
//!
//! A stand-in decoder answers for Google, so no service account is needed.

use async_trait::async_trait;
use devicecheck_appattest::AppAttestVerifier;
use devicecheck_core::{
    AppAttestConfig, AppRecognitionVerdict, AttestationGate, CheckLevel, DeviceRecognitionVerdict,
    MemorySession, Outcome, Phase, PlayIntegrityConfig, SubmittedSlots, VerificationConfig,
    VerifierRegistry,
};
use devicecheck_playintegrity::client::{DecodeError, IntegrityTokenDecoder};
use devicecheck_playintegrity::payload::{
    AppIntegrity, DeviceIntegrity, RequestDetails, TokenPayloadExternal,
};
use devicecheck_playintegrity::PlayIntegrityVerifier;

/// Treats the integrity token as the nonce the device was asked to embed.
struct EchoDecoder;

#[async_trait]
impl IntegrityTokenDecoder for EchoDecoder {
    async fn decode(
        &self,
        integrity_token: &str,
        config: &PlayIntegrityConfig,
    ) -> Result<TokenPayloadExternal, DecodeError> {
        Ok(TokenPayloadExternal {
            request_details: RequestDetails {
                request_package_name: Some(config.package_name.clone()),
                nonce: Some(integrity_token.to_string()),
                timestamp_millis: None,
            },
            app_integrity: AppIntegrity {
                app_recognition_verdict: Some(AppRecognitionVerdict::PlayRecognized),
                package_name: Some(config.package_name.clone()),
                ..AppIntegrity::default()
            },
            device_integrity: DeviceIntegrity {
                device_recognition_verdict: [DeviceRecognitionVerdict::MeetsDeviceIntegrity]
                    .into_iter()
                    .collect(),
            },
            ..TokenPayloadExternal::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = VerifierRegistry::new()
        .with(Box::new(AppAttestVerifier::new()))
        .with(Box::new(PlayIntegrityVerifier::with_decoder(Box::new(
            EchoDecoder,
        ))));
    println!("Registered schemes: {:?}\n", registry.schemes());
    let gate = AttestationGate::new(registry);

    // Play Integrity: a device that echoes the nonce passes NONCE_DEVICE_APP.
    let config = VerificationConfig::PlayIntegrity(PlayIntegrityConfig {
        service_credentials_json: r#"{"type": "service_account"}"#.to_string(),
        check_level: CheckLevel::NonceDeviceApp,
        ..PlayIntegrityConfig::default()
    });
    let mut session = MemorySession::new();

    println!("1. START ({})", config.scheme());
    let prompt = match gate.evaluate(Phase::Start, &mut session, &config).await {
        Outcome::Emit(prompt) => prompt,
        Outcome::Decided(decision) => anyhow::bail!("gate refused to start: {}", decision),
    };
    println!("   metadata: {}", serde_json::to_string(&prompt.metadata)?);
    println!("   slots:    {}\n", serde_json::to_string(&prompt.slots)?);

    println!("2. RESUME with a token bound to the nonce");
    let slots = SubmittedSlots::new().with("token", prompt.challenge.as_str());
    let outcome = gate.evaluate(Phase::Resume(&slots), &mut session, &config).await;
    println!("   decision: {}\n", describe(&outcome));

    println!("3. RESUME again with the same token (transaction already consumed)");
    let outcome = gate.evaluate(Phase::Resume(&slots), &mut session, &config).await;
    println!("   decision: {}\n", describe(&outcome));

    // App Attest: the client never filled in its slots.
    let config = VerificationConfig::AppAttest(AppAttestConfig::default());
    let mut session = MemorySession::new();

    println!("4. START ({})", config.scheme());
    if let Outcome::Emit(prompt) = gate.evaluate(Phase::Start, &mut session, &config).await {
        println!("   metadata: {}", serde_json::to_string(&prompt.metadata)?);
    }

    println!("5. RESUME with placeholder slots");
    let slots: SubmittedSlots = [("keyId", "false"), ("attestation", "false")]
        .into_iter()
        .collect();
    let outcome = gate.evaluate(Phase::Resume(&slots), &mut session, &config).await;
    println!("   decision: {}", describe(&outcome));

    Ok(())
}

fn describe(outcome: &Outcome) -> String {
    match outcome.decision() {
        Some(decision) => decision.to_string(),
        None => "still awaiting evidence".to_string(),
    }
}
