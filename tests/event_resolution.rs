//! End-to-end exercise of the decision pipeline and ticket lifecycle: login
//! with a multifactor challenge, ticket issuance, step-up on a later
//! request, and background cleanup.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::sync::Arc;

use varco::authn::{
    Authentication, AuthenticationError, AuthenticationResult, AuthenticationResultBuilder,
    AuthenticationSystemSupport, Credential, HandlerResult, Principal,
};
use varco::config::{MultifactorConfig, TicketingConfig};
use varco::mfa::trigger::{GlobalTrigger, PrincipalAttributeTrigger};
use varco::mfa::{MFA_CONTEXT_ATTRIBUTE, ProviderDirectory, StaticMultifactorProvider};
use varco::service::{
    DefaultAccessStrategyEnforcer, InMemoryServicesManager, RegisteredService, Service,
};
use varco::ticket::registry::{
    DefaultTicketRegistryCleaner, InMemoryTicketRegistry, RegistryBackedSupport, TicketCipher,
    TicketRegistry, TicketRegistryCleaner, TracingEventSink,
};
use varco::ticket::{Ticket, TicketFactory};
use varco::webflow::resolver::{
    DelegatingEventResolver, RankedEventResolver, SelectiveEventResolver, WebflowEventResolver,
};
use varco::webflow::{FlowContext, TRANSITION_SUCCESS};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Password-checking stand-in for the external authentication engine.
struct PasswordSupport;

impl PasswordSupport {
    fn authenticate(credential: &Credential) -> Result<Authentication, AuthenticationError> {
        if credential.expose_password() != Some("hunter2") {
            return Err(AuthenticationError::Failed("bad credentials".to_string()));
        }
        Ok(Authentication::new(
            Principal::new(credential.id()).with_attribute("groups", ["staff"]),
        )
        .with_success(HandlerResult::new("password-handler")))
    }
}

#[async_trait]
impl AuthenticationSystemSupport for PasswordSupport {
    async fn handle_initial_authentication_transaction(
        &self,
        _service: Option<&Service>,
        credential: &Credential,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError> {
        Ok(AuthenticationResultBuilder::new()
            .collect_authentication(Self::authenticate(credential)?)
            .collect_credential(credential.clone()))
    }

    async fn handle_authentication_transaction(
        &self,
        _service: Option<&Service>,
        builder: AuthenticationResultBuilder,
        credential: &Credential,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError> {
        Ok(builder
            .collect_authentication(Self::authenticate(credential)?)
            .collect_credential(credential.clone()))
    }

    async fn establish_authentication_context_from_initial(
        &self,
        authentication: Authentication,
        credential: Option<Credential>,
    ) -> Result<AuthenticationResultBuilder, AuthenticationError> {
        let mut builder =
            AuthenticationResultBuilder::new().collect_authentication(authentication);
        if let Some(credential) = credential {
            builder = builder.collect_credential(credential);
        }
        Ok(builder)
    }

    async fn finalize_authentication_transaction(
        &self,
        service: Option<&Service>,
        builder: AuthenticationResultBuilder,
    ) -> Result<AuthenticationResult, AuthenticationError> {
        builder.build(service.cloned())
    }
}

fn directory() -> Arc<ProviderDirectory> {
    Arc::new(
        ProviderDirectory::new()
            .with_provider(Arc::new(StaticMultifactorProvider::new("mfa-duo", 10)))
            .with_provider(Arc::new(StaticMultifactorProvider::new("mfa-webauthn", 20))),
    )
}

fn delegating(directory: &Arc<ProviderDirectory>) -> Arc<DelegatingEventResolver> {
    let services = Arc::new(InMemoryServicesManager::new(vec![RegisteredService::new(
        1,
        "app",
        "^https://app\\.example\\.org.*",
    )]));
    Arc::new(
        DelegatingEventResolver::new(
            Arc::new(PasswordSupport),
            services,
            Arc::new(DefaultAccessStrategyEnforcer),
            SelectiveEventResolver::new(Arc::clone(directory)),
        )
        .with_trigger(Arc::new(PrincipalAttributeTrigger::new(
            Arc::clone(directory),
            ["groups"],
            "^staff$",
            "mfa-duo",
        ))),
    )
}

fn login_context() -> FlowContext {
    FlowContext::new()
        .with_credential(Credential::username_password("casuser", "hunter2"))
        .with_service(Service::new("https://app.example.org/login"))
        .with_transition("mfa-duo")
        .with_transition("mfa-webauthn")
}

#[tokio::test]
async fn login_challenge_ticket_issuance_and_step_up() {
    init_tracing();
    let directory = directory();
    let resolver = delegating(&directory);
    let registry: Arc<dyn TicketRegistry> = Arc::new(InMemoryTicketRegistry::new());
    let factory = TicketFactory::from_config(&TicketingConfig::new());

    // 1. Login resolves to the multifactor challenge selected by the
    // principal-attribute trigger.
    let mut ctx = login_context();
    let event = resolver.resolve(&mut ctx).await.unwrap();
    assert_eq!(event.id(), "mfa-duo");

    // 2. The (external) challenge completes; the satisfied context is
    // recorded and the session ticket is minted.
    let mut authentication = ctx.authentication().cloned().unwrap();
    authentication.append_attribute_value(MFA_CONTEXT_ATTRIBUTE, "mfa-duo");
    let mut tgt = factory.create_ticket_granting_ticket(authentication).unwrap();
    let tgt_id = tgt.id().to_string();

    // 3. Grant and validate a service ticket for the relying service.
    let service = Service::new("https://app.example.org/login");
    let mut st = factory
        .grant_service_ticket(&mut tgt, service.clone(), true)
        .unwrap();
    registry.add_ticket(Ticket::from(st.clone())).await.unwrap();
    registry.add_ticket(Ticket::from(tgt.clone())).await.unwrap();

    st.validate().unwrap();
    registry.update_ticket(Ticket::from(st.clone())).await.unwrap();
    // A consumed single-use ticket is reaped on next access.
    assert!(registry.get_ticket(st.id()).await.unwrap().is_none());

    // 4. A later request with the session resolves to the same factor and
    // resumes without a new challenge.
    let ranked = RankedEventResolver::new(
        Arc::new(RegistryBackedSupport::new(Arc::clone(&registry))),
        delegating(&directory),
        Arc::clone(&directory),
    );
    let mut revisit = FlowContext::new()
        .with_service(Service::new("https://app.example.org/area"))
        .with_ticket_granting_ticket(&tgt_id)
        .with_transition("mfa-duo")
        .with_transition("mfa-webauthn");
    let event = ranked.resolve(&mut revisit).await.unwrap();
    assert_eq!(event.id(), TRANSITION_SUCCESS);

    // 5. A stronger factor demanded by another trigger still steps up.
    let stronger = Arc::new(
        DelegatingEventResolver::new(
            Arc::new(PasswordSupport),
            Arc::new(InMemoryServicesManager::new(vec![RegisteredService::new(
                1,
                "app",
                "^https://app\\.example\\.org.*",
            )])),
            Arc::new(DefaultAccessStrategyEnforcer),
            SelectiveEventResolver::new(Arc::clone(&directory)),
        )
        .with_trigger(Arc::new(GlobalTrigger::new(
            Arc::clone(&directory),
            &MultifactorConfig::new().with_global_provider("mfa-webauthn"),
        ))),
    );
    let ranked_stronger = RankedEventResolver::new(
        Arc::new(RegistryBackedSupport::new(Arc::clone(&registry))),
        stronger,
        Arc::clone(&directory),
    );
    let mut step_up = FlowContext::new()
        .with_service(Service::new("https://app.example.org/vault"))
        .with_ticket_granting_ticket(&tgt_id)
        .with_transition("mfa-duo")
        .with_transition("mfa-webauthn");
    let event = ranked_stronger.resolve(&mut step_up).await.unwrap();
    assert_eq!(event.id(), "mfa-webauthn");

    // 6. Logout: the revoked session and everything it owns is swept.
    let mut session = match registry.get_ticket(&tgt_id).await.unwrap().unwrap() {
        Ticket::TicketGranting(tgt) => tgt,
        other => panic!("expected a session ticket, got {}", other.prefix()),
    };
    session.mark_expired();
    registry
        .update_ticket(Ticket::from(session))
        .await
        .unwrap();

    let cleaner =
        DefaultTicketRegistryCleaner::new(Arc::clone(&registry), Arc::new(TracingEventSink));
    assert!(cleaner.clean().await >= 1);
    assert!(registry.get_ticket(&tgt_id).await.unwrap().is_none());
    assert_eq!(cleaner.clean().await, 0);
}

#[tokio::test]
async fn encrypted_registry_runs_the_same_lifecycle() {
    init_tracing();
    let registry: Arc<dyn TicketRegistry> =
        Arc::new(InMemoryTicketRegistry::new().with_cipher(TicketCipher::new([7u8; 32])));
    let factory = TicketFactory::from_config(&TicketingConfig::new());

    let mut tgt = factory
        .create_ticket_granting_ticket(Authentication::new(
            Principal::new("casuser").with_attribute("groups", ["staff"]),
        ))
        .unwrap();
    let st = factory
        .grant_service_ticket(&mut tgt, Service::new("https://app.example.org"), true)
        .unwrap();
    let pgt = factory.grant_proxy_granting_ticket(&mut tgt, &st).unwrap();

    registry.add_ticket(Ticket::from(st.clone())).await.unwrap();
    registry.add_ticket(Ticket::from(pgt.clone())).await.unwrap();
    registry.add_ticket(Ticket::from(tgt.clone())).await.unwrap();

    // Plaintext ids resolve against digest storage keys, losslessly.
    let loaded = registry.get_ticket(tgt.id()).await.unwrap().unwrap();
    assert_eq!(loaded, Ticket::from(tgt.clone()));
    assert_eq!(registry.session_count().await, 1);
    assert_eq!(registry.service_ticket_count().await, 1);
    assert_eq!(registry.count_sessions_for("casuser").await, 1);

    // Cascade: session + service ticket + proxy-granting ticket.
    assert_eq!(registry.delete_ticket(tgt.id()).await.unwrap(), 3);
    for id in [tgt.id(), st.id(), pgt.id()] {
        assert!(registry.get_ticket(id).await.unwrap().is_none());
    }
}
