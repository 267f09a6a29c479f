//! Authorization gate, consulted before any mutation.
//!
//! Creation is open to any named, non-anonymous user; updates admit the
//! admin, the owner, members of the owner group, and listed co-owners.

use mintage_domain::config::Config;

use crate::external::identity::Caller;

pub fn authorize_create(_cfg: &Config, caller: &Caller, _qualified_prefix: &str) -> bool {
    caller.user.name != "anonymous" && !caller.user.pid.is_empty()
}

#[allow(clippy::too_many_arguments)]
pub fn authorize_update(
    cfg: &Config,
    caller: &Caller,
    owner_pid: Option<&str>,
    owner_group_pid: Option<&str>,
    co_owner_pids: &[String],
    _keys_being_set: &[String],
) -> bool {
    if is_admin(cfg, caller) {
        return true;
    }
    if owner_pid == Some(caller.user.pid.as_str()) {
        return true;
    }
    if owner_group_pid == Some(caller.group.pid.as_str()) {
        return true;
    }
    co_owner_pids.iter().any(|p| p == &caller.user.pid)
}

pub fn is_admin(cfg: &Config, caller: &Caller) -> bool {
    caller.user.name == cfg.directory.admin_username
}

#[cfg(test)]
mod tests {
    use mintage_domain::config::Config;

    use super::*;
    use crate::external::identity::Agent;

    fn caller(name: &str, pid: &str, group_pid: &str) -> Caller {
        Caller {
            user: Agent {
                name: name.into(),
                pid: pid.into(),
            },
            group: Agent {
                name: "g".into(),
                pid: group_pid.into(),
            },
        }
    }

    #[test]
    fn anonymous_cannot_create() {
        let cfg = Config::default();
        assert!(!authorize_create(
            &cfg,
            &caller("anonymous", "ark:/99166/p9x", "ark:/99166/p9g"),
            "ark:/13030/fk4"
        ));
        assert!(authorize_create(
            &cfg,
            &caller("u", "ark:/99166/p9u", "ark:/99166/p9g"),
            "ark:/13030/fk4"
        ));
    }

    #[test]
    fn owner_group_and_coowners_can_update() {
        let cfg = Config::default();
        let co = vec!["ark:/99166/p9c".to_owned()];

        let owner = caller("u", "ark:/99166/p9u", "ark:/99166/p9g");
        assert!(authorize_update(&cfg, &owner, Some("ark:/99166/p9u"), None, &co, &[]));

        let group_member = caller("m", "ark:/99166/p9m", "ark:/99166/p9g");
        assert!(authorize_update(
            &cfg,
            &group_member,
            Some("ark:/99166/p9u"),
            Some("ark:/99166/p9g"),
            &co,
            &[]
        ));

        let co_owner = caller("c", "ark:/99166/p9c", "ark:/99166/p9z");
        assert!(authorize_update(&cfg, &co_owner, Some("ark:/99166/p9u"), None, &co, &[]));

        let stranger = caller("s", "ark:/99166/p9s", "ark:/99166/p9z");
        assert!(!authorize_update(&cfg, &stranger, Some("ark:/99166/p9u"), None, &co, &[]));
    }

    #[test]
    fn admin_can_update_anything() {
        let cfg = Config::default();
        let admin = caller("admin", "ark:/99166/p9a", "ark:/99166/p9z");
        assert!(authorize_update(&cfg, &admin, Some("ark:/99166/p9u"), None, &[], &[]));
    }
}
