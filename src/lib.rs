//! # Varco (Central Authentication & SSO Core)
//!
//! `varco` is the decision core of a ticket-based single sign-on server: it
//! resolves, for every authentication request, which step the protocol
//! state machine takes next — plain success, a multifactor challenge, a
//! warning or a failure — and it manages the lifecycle, storage and
//! encoding of the security tickets that represent authenticated sessions.
//!
//! ## Event resolution
//!
//! A delegating resolver runs the primary-factor transaction, enforces the
//! relying service's access policy, and collects candidate events from an
//! ordered list of pluggable triggers (attribute-, request-, time-, REST-
//! and service-driven). A selective resolver arbitrates the candidates
//! against the live provider directory; ties go to the least-escalated
//! factor. A ranked resolver handles requests carrying an existing session,
//! resuming when a previously satisfied factor subsumes the requested one
//! and stepping up otherwise.
//!
//! ## Tickets
//!
//! Ticket-granting tickets own the session; service tickets are single-use
//! grants per relying service; proxy-granting tickets extend a validated
//! grant to back-end services. The registry reaps expired tickets lazily on
//! access, cascades deletion over everything a session owns, and — when a
//! cipher is configured — transparently encrypts entries and stores them
//! under digest keys. A background cleaner sweeps what lazy expiry misses.
//!
//! ## Collaborators
//!
//! The authentication engine, service catalog and web layer are consumed
//! through traits ([`authn::AuthenticationSystemSupport`],
//! [`service::ServicesManager`], typed [`webflow::FlowContext`]); this
//! crate never touches HTTP requests or protocol rendering directly.

pub mod authn;
pub mod config;
pub mod mfa;
pub mod service;
pub mod ticket;
pub mod webflow;
