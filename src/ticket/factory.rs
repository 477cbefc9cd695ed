//! Mints tickets with configured ids and expiration policies.

use anyhow::Result;
use std::sync::Arc;

use crate::authn::Authentication;
use crate::config::TicketingConfig;
use crate::service::Service;

use super::{
    ExpirationPolicy, PROXY_GRANTING_TICKET_PREFIX, ProxyGrantingTicket, SERVICE_TICKET_PREFIX,
    ServiceTicket, TICKET_GRANTING_TICKET_PREFIX, TicketGrantingTicket, TicketIdGenerator,
    id::RandomTicketIdGenerator,
};

/// Creates ticket entities; the registry stores what the factory mints.
#[derive(Clone)]
pub struct TicketFactory {
    id_generator: Arc<dyn TicketIdGenerator>,
    tgt_expiration: ExpirationPolicy,
    st_expiration: ExpirationPolicy,
    pgt_expiration: ExpirationPolicy,
}

impl TicketFactory {
    #[must_use]
    pub fn new(
        tgt_expiration: ExpirationPolicy,
        st_expiration: ExpirationPolicy,
        pgt_expiration: ExpirationPolicy,
    ) -> Self {
        Self {
            id_generator: Arc::new(RandomTicketIdGenerator),
            tgt_expiration,
            st_expiration,
            pgt_expiration,
        }
    }

    #[must_use]
    pub fn from_config(config: &TicketingConfig) -> Self {
        Self::new(
            config.tgt_expiration_policy(),
            config.st_expiration_policy(),
            config.pgt_expiration_policy(),
        )
    }

    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn TicketIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    /// Mint the session ticket for a fresh primary authentication.
    ///
    /// # Errors
    /// Returns an error if id generation fails.
    pub fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<TicketGrantingTicket> {
        let id = self.id_generator.new_id(TICKET_GRANTING_TICKET_PREFIX)?;
        Ok(TicketGrantingTicket::new(
            id,
            authentication,
            self.tgt_expiration.clone(),
        ))
    }

    /// Grant a service ticket from an existing session. The session's
    /// tracking map is updated; callers must re-persist the session through
    /// the registry.
    ///
    /// # Errors
    /// Returns an error if id generation fails or the session has expired.
    pub fn grant_service_ticket(
        &self,
        ticket_granting_ticket: &mut TicketGrantingTicket,
        service: Service,
        from_new_login: bool,
    ) -> Result<ServiceTicket> {
        let id = self.id_generator.new_id(SERVICE_TICKET_PREFIX)?;
        let ticket = ticket_granting_ticket.grant_service_ticket(
            id,
            service,
            self.st_expiration.clone(),
            from_new_login,
        )?;
        Ok(ticket)
    }

    /// Mint a proxy-granting ticket for a validated service ticket and
    /// register it into the owning session.
    ///
    /// # Errors
    /// Returns an error if id generation fails.
    pub fn grant_proxy_granting_ticket(
        &self,
        ticket_granting_ticket: &mut TicketGrantingTicket,
        service_ticket: &ServiceTicket,
    ) -> Result<ProxyGrantingTicket> {
        let id = self.id_generator.new_id(PROXY_GRANTING_TICKET_PREFIX)?;
        let pgt = ProxyGrantingTicket::new(
            id,
            service_ticket.ticket_granting_ticket_id(),
            service_ticket.service().clone(),
            self.pgt_expiration.clone(),
        );
        ticket_granting_ticket.register_proxy_granting_ticket(&pgt);
        Ok(pgt)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::authn::Principal;

    fn factory() -> TicketFactory {
        TicketFactory::new(
            ExpirationPolicy::NeverExpires,
            ExpirationPolicy::MultiUse { max_uses: 1 },
            ExpirationPolicy::NeverExpires,
        )
    }

    #[test]
    fn minted_tickets_carry_typed_prefixes() {
        let factory = factory();
        let mut tgt = factory
            .create_ticket_granting_ticket(Authentication::new(Principal::new("casuser")))
            .unwrap();
        assert!(tgt.id().starts_with("TGT-"));

        let st = factory
            .grant_service_ticket(&mut tgt, Service::new("https://app.example.org"), true)
            .unwrap();
        assert!(st.id().starts_with("ST-"));
        assert_eq!(st.ticket_granting_ticket_id(), tgt.id());

        let pgt = factory.grant_proxy_granting_ticket(&mut tgt, &st).unwrap();
        assert!(pgt.id().starts_with("PGT-"));
        assert_eq!(tgt.proxy_granting_ticket_ids(), [pgt.id().to_string()]);
    }
}
