//! Identity directory: agent PIDs to local names and back.
//!
//! Agents (users and groups) are declared in configuration. PID lookups fall
//! back to the raw PID for unknown agents so metadata projection never
//! fails; name lookups are strict because they gate co-ownership.

use mintage_domain::config::AgentConfig;
use mintage_domain::trace::TraceEvent;
use mintage_domain::{Error, Result};

use crate::state::ConfigHandle;

/// A resolved agent identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub name: String,
    /// Agent PID, itself an ARK.
    pub pid: String,
}

/// The identities an operation runs under.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: Agent,
    pub group: Agent,
}

/// Directory over the configured agent table.
pub struct IdentityDirectory {
    config: ConfigHandle,
}

impl IdentityDirectory {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    fn with_agents<T>(&self, f: impl FnOnce(&[AgentConfig]) -> T) -> T {
        let cfg = self.config.read().clone();
        f(&cfg.directory.agents)
    }

    /// Local name for an agent PID. Unknown PIDs resolve to themselves.
    pub fn agent_name(&self, pid: &str) -> String {
        self.with_agents(|agents| match agents.iter().find(|a| a.pid == pid) {
            Some(agent) => {
                TraceEvent::AgentResolved {
                    pid: pid.to_owned(),
                    name: agent.name.clone(),
                }
                .emit();
                agent.name.clone()
            }
            None => pid.to_owned(),
        })
    }

    /// PID for a local user name.
    pub fn user_pid(&self, name: &str) -> Result<String> {
        self.with_agents(|agents| {
            agents
                .iter()
                .find(|a| a.name == name && a.kind == "user")
                .map(|a| a.pid.clone())
                .ok_or(Error::UnknownUser)
        })
    }

    /// Registrar-notification address for an agent PID, if one is set.
    pub fn registrar_email(&self, pid: &str) -> Option<String> {
        self.with_agents(|agents| {
            agents
                .iter()
                .find(|a| a.pid == pid)
                .map(|a| a.registrar_email.clone())
                .filter(|e| !e.is_empty())
        })
    }

    /// A caller for a configured user, with an optional explicit group. When
    /// no group is named the user's own agent entry doubles as the group.
    pub fn caller(&self, user_name: &str, group_name: Option<&str>) -> Result<Caller> {
        self.with_agents(|agents| {
            let user = agents
                .iter()
                .find(|a| a.name == user_name)
                .map(|a| Agent {
                    name: a.name.clone(),
                    pid: a.pid.clone(),
                })
                .ok_or(Error::UnknownUser)?;
            let group = match group_name {
                Some(g) => agents
                    .iter()
                    .find(|a| a.name == g)
                    .map(|a| Agent {
                        name: a.name.clone(),
                        pid: a.pid.clone(),
                    })
                    .ok_or(Error::UnknownUser)?,
                None => user.clone(),
            };
            Ok(Caller { user, group })
        })
    }

    /// The caller the daemon and offline tooling act as.
    pub fn admin_caller(&self) -> Caller {
        let admin_name = self.config.read().directory.admin_username.clone();
        self.caller(&admin_name, None).unwrap_or_else(|_| {
            // The admin may be absent from the agent table; synthesize an
            // identity so daemon write-backs still carry a name.
            let agent = Agent {
                name: admin_name.clone(),
                pid: format!("user:{admin_name}"),
            };
            Caller {
                user: agent.clone(),
                group: agent,
            }
        })
    }
}
