use std::sync::Arc;

use uuid::Uuid;

use crate::chat::message::{AgentId, SessionId};
use crate::settings::PreferenceStore;

pub const LAST_SELECTED_AGENT_KEY: &str = "lastSelectedAgentId";

/// Navigation state: the agent segment plus the optional `session` query value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
}

impl Route {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// A route the host router should move to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub route: Route,
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: Option<SessionId>,
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSelection {
    pub navigation: NavigationRequest,
    /// True only for ephemeral conversations; an active session keeps its messages.
    pub clear_messages: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteChange {
    Unchanged,
    AgentOnly,
    Session { previous: Option<SessionId> },
}

/// New session ids look like `chat_1a2b3c4d`.
pub fn generate_session_id() -> SessionId {
    let raw = Uuid::new_v4().simple().to_string();
    SessionId::new(format!("chat_{}", &raw[..8]))
}

/// Keeps agent selection and session identity consistent with navigation and preferences.
pub struct SessionBinder {
    identity: SessionIdentity,
    preferences: Arc<dyn PreferenceStore>,
    default_agent: AgentId,
}

impl SessionBinder {
    pub fn new(route: Route, preferences: Arc<dyn PreferenceStore>, default_agent: AgentId) -> Self {
        let binder = Self {
            identity: SessionIdentity {
                session_id: route.session_id,
                agent_id: route.agent_id,
            },
            preferences,
            default_agent,
        };
        binder.remember_agent();
        binder
    }

    /// Agent for routes that name none: the last used one, else the configured default.
    pub fn preferred_agent(preferences: &dyn PreferenceStore, default_agent: &AgentId) -> AgentId {
        preferences
            .get(LAST_SELECTED_AGENT_KEY)
            .filter(|agent_id| !agent_id.trim().is_empty())
            .map(AgentId::new)
            .unwrap_or_else(|| default_agent.clone())
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.identity.session_id.as_ref()
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.identity.agent_id
    }

    pub fn current_route(&self) -> Route {
        Route {
            agent_id: self.identity.agent_id.clone(),
            session_id: self.identity.session_id.clone(),
        }
    }

    pub fn select_agent(&mut self, agent_id: AgentId) -> AgentSelection {
        self.identity.agent_id = agent_id;
        self.remember_agent();

        AgentSelection {
            navigation: NavigationRequest {
                route: self.current_route(),
                replace: true,
            },
            clear_messages: self.identity.session_id.is_none(),
        }
    }

    pub fn apply_route(&mut self, route: Route) -> RouteChange {
        let agent_changed = route.agent_id != self.identity.agent_id;
        if agent_changed {
            self.identity.agent_id = route.agent_id;
            self.remember_agent();
        }

        if route.session_id != self.identity.session_id {
            let previous = std::mem::replace(&mut self.identity.session_id, route.session_id);
            return RouteChange::Session { previous };
        }

        if agent_changed {
            RouteChange::AgentOnly
        } else {
            RouteChange::Unchanged
        }
    }

    /// Route for a fresh conversation under the last used agent.
    pub fn new_chat(&self) -> NavigationRequest {
        let agent_id = Self::preferred_agent(self.preferences.as_ref(), &self.default_agent);
        NavigationRequest {
            route: Route::new(agent_id).with_session(generate_session_id()),
            replace: false,
        }
    }

    fn remember_agent(&self) {
        if let Err(error) = self
            .preferences
            .set(LAST_SELECTED_AGENT_KEY, self.identity.agent_id.as_str())
        {
            tracing::warn!(
                agent_id = %self.identity.agent_id,
                error = %error,
                "failed to remember last selected agent"
            );
        }
    }
}
