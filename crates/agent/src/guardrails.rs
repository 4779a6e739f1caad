//! Policy gate: who is asking, from where, and whether a skill may run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use taskpilot_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use taskpilot_core::domain::actor::{ActorContext, ActorRole, SurfaceContext, SurfaceType};
use taskpilot_core::ports::ProfileDirectory;

use crate::tools::SkillRegistry;

pub const REASON_ALLOWED: &str = "allowed";
pub const REASON_UNKNOWN_ACTOR: &str = "unknown_actor";
pub const REASON_UNKNOWN_SURFACE: &str = "unknown_surface";
pub const REASON_UNKNOWN_SKILL: &str = "unknown_skill";
pub const REASON_NON_DM_MUTATION: &str = "non_dm_mutation";
pub const REASON_NON_DM_READ: &str = "non_dm_read";
pub const REASON_VIEWER_MUTATION_DENIED: &str = "viewer_mutation_denied";
pub const REASON_ADMIN_SKILL_DENIED: &str = "admin_skill_denied";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason_code: &'static str,
    pub user_message: String,
    pub meta: BTreeMap<String, String>,
}

impl PolicyDecision {
    fn allow(meta: BTreeMap<String, String>) -> Self {
        Self { allowed: true, reason_code: REASON_ALLOWED, user_message: String::new(), meta }
    }

    fn deny(reason_code: &'static str, user_message: &str, meta: BTreeMap<String, String>) -> Self {
        Self { allowed: false, reason_code, user_message: user_message.to_string(), meta }
    }
}

/// Resolves the actor for this request from the session's profile link.
///
/// Any failure along the way yields an unknown actor; this never errors.
pub async fn resolve_actor(
    profiles: &dyn ProfileDirectory,
    profile_id: Option<&str>,
    external_user_id: &str,
) -> ActorContext {
    let Some(profile_id) = profile_id.filter(|id| !id.trim().is_empty()) else {
        return ActorContext::unknown(None, external_user_id);
    };

    match profiles.find_profile(profile_id).await {
        Ok(Some(profile)) => ActorContext {
            profile_id: Some(profile.id),
            external_user_id: external_user_id.to_string(),
            role: profile.role,
            is_admin: profile.is_admin,
        },
        Ok(None) => {
            warn!(
                event_name = "policy.actor.profile_missing",
                profile_id,
                "profile not found; treating actor as unknown"
            );
            ActorContext::unknown(Some(profile_id.to_string()), external_user_id)
        }
        Err(error) => {
            warn!(
                event_name = "policy.actor.lookup_failed",
                profile_id,
                error = %error,
                "profile lookup failed; treating actor as unknown"
            );
            ActorContext::unknown(Some(profile_id.to_string()), external_user_id)
        }
    }
}

/// Surface type from the explicit hint, else from the channel id prefix.
pub fn resolve_surface(channel_id: &str, surface_hint: Option<&str>) -> SurfaceContext {
    let surface_type = surface_hint
        .and_then(SurfaceType::parse)
        .filter(SurfaceType::is_known)
        .unwrap_or_else(|| match channel_id.chars().next() {
            Some('D') => SurfaceType::Dm,
            Some('C') => SurfaceType::Channel,
            Some('G') => SurfaceType::Group,
            _ => SurfaceType::Unknown,
        });

    SurfaceContext { channel_id: channel_id.to_string(), surface_type }
}

/// Pure policy evaluation. The first matching rule wins.
pub fn evaluate_skill_policy(
    registry: &SkillRegistry,
    actor: &ActorContext,
    surface: &SurfaceContext,
    skill_id: &str,
) -> PolicyDecision {
    let mut meta = BTreeMap::new();
    meta.insert("actor_role".to_string(), actor.role.as_str().to_string());
    meta.insert("surface_type".to_string(), surface.surface_type.as_str().to_string());
    meta.insert("skill_id".to_string(), skill_id.to_string());

    if !actor.role.is_known() {
        return PolicyDecision::deny(
            REASON_UNKNOWN_ACTOR,
            "I don't recognize your account yet. Ask an admin to set up your profile.",
            meta,
        );
    }
    if !surface.surface_type.is_known() {
        return PolicyDecision::deny(
            REASON_UNKNOWN_SURFACE,
            "I can't tell where this message came from, so I won't act on it.",
            meta,
        );
    }
    let Some(skill) = registry.get(skill_id) else {
        return PolicyDecision::deny(REASON_UNKNOWN_SKILL, "That isn't something I can do.", meta);
    };
    if surface.surface_type != SurfaceType::Dm {
        return if skill.mutating {
            PolicyDecision::deny(
                REASON_NON_DM_MUTATION,
                "I only make changes from a direct message. Send me a DM to continue.",
                meta,
            )
        } else {
            PolicyDecision::deny(
                REASON_NON_DM_READ,
                "I only answer in direct messages. Send me a DM and I'll help there.",
                meta,
            )
        };
    }
    if actor.role == ActorRole::Viewer && skill.mutating {
        return PolicyDecision::deny(
            REASON_VIEWER_MUTATION_DENIED,
            "Your role is read-only, so I can't make that change for you.",
            meta,
        );
    }
    if skill.admin_only && !actor.is_admin {
        return PolicyDecision::deny(
            REASON_ADMIN_SKILL_DENIED,
            "Only admins can do that.",
            meta,
        );
    }

    PolicyDecision::allow(meta)
}

/// Policy evaluation plus audit emission for every decision.
#[derive(Clone)]
pub struct PolicyGate {
    registry: Arc<SkillRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl PolicyGate {
    pub fn new(registry: Arc<SkillRegistry>, audit: Arc<dyn AuditSink>) -> Self {
        Self { registry, audit }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn evaluate(
        &self,
        actor: &ActorContext,
        surface: &SurfaceContext,
        skill_id: &str,
        session_id: Option<&str>,
        correlation_id: &str,
    ) -> PolicyDecision {
        let decision = evaluate_skill_policy(&self.registry, actor, surface, skill_id);

        if decision.allowed {
            info!(
                event_name = "policy.decision.allowed",
                correlation_id,
                skill_id,
                actor_role = actor.role.as_str(),
                surface_type = surface.surface_type.as_str(),
                "skill allowed"
            );
        } else {
            warn!(
                event_name = "policy.decision.denied",
                correlation_id,
                skill_id,
                reason_code = decision.reason_code,
                actor_role = actor.role.as_str(),
                surface_type = surface.surface_type.as_str(),
                "skill denied"
            );
        }

        let outcome =
            if decision.allowed { AuditOutcome::Success } else { AuditOutcome::Rejected };
        let mut event = AuditEvent::new(
            session_id.map(str::to_string),
            correlation_id,
            if decision.allowed { "policy.decision.allowed" } else { "policy.decision.denied" },
            AuditCategory::Policy,
            actor.external_user_id.clone(),
            outcome,
        )
        .with_metadata("reason_code", decision.reason_code);
        for (key, value) in &decision.meta {
            event = event.with_metadata(key.clone(), value.clone());
        }
        self.audit.emit(event);

        decision
    }
}
