use crate::config::PermissionsConfig;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Operations a principal may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Action {
    Start,
    Stop,
    Status,
    Issue,
    Players,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Status => "status",
            Action::Issue => "issue",
            Action::Players => "players",
        };
        f.write_str(name)
    }
}

/// Built-in role identifiers with fixed grants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Starter,
    Stopper,
    Status,
    Trusted,
    Admin,
}

impl Role {
    pub fn parse(identifier: &str) -> Option<Role> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "starter" => Some(Role::Starter),
            "stopper" => Some(Role::Stopper),
            "status" => Some(Role::Status),
            "trusted" => Some(Role::Trusted),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn grants(&self) -> &'static [Action] {
        match self {
            Role::Starter => &[Action::Start],
            Role::Stopper => &[Action::Stop],
            Role::Status => &[Action::Status, Action::Players],
            Role::Trusted => &[Action::Start, Action::Status, Action::Players],
            Role::Admin => &[
                Action::Start,
                Action::Stop,
                Action::Status,
                Action::Issue,
                Action::Players,
            ],
        }
    }
}

/// Whoever is asking, identified by the role names they hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(name: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role_name: &str) -> bool {
        self.roles.contains(role_name)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait::async_trait]
pub trait CapabilityCheck: Send + Sync {
    async fn can_perform(&self, action: Action, principal: &Principal) -> bool;
}

/// Lets everyone do everything; used when permissions are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait::async_trait]
impl CapabilityCheck for AllowAll {
    async fn can_perform(&self, _action: Action, _principal: &Principal) -> bool {
        true
    }
}

/// Maps configured role names onto built-in roles
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    entries: Vec<(Role, String)>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role, role_name: &str) -> Self {
        self.entries.push((role, role_name.to_string()));
        self
    }

    /// Unknown identifiers are skipped; `PhasewatchConfig::validate` reports them
    pub fn from_config(config: &PermissionsConfig) -> Self {
        config
            .roles
            .iter()
            .filter_map(|(identifier, role_name)| {
                Role::parse(identifier).map(|role| (role, role_name.as_str()))
            })
            .fold(Self::new(), |table, (role, role_name)| table.with_role(role, role_name))
    }

    /// Union of the grants of every role the principal holds
    pub fn actions_for(&self, principal: &Principal) -> BTreeSet<Action> {
        self.entries
            .iter()
            .filter(|(_, role_name)| principal.has_role(role_name))
            .flat_map(|(role, _)| role.grants().iter().copied())
            .collect()
    }
}

#[async_trait::async_trait]
impl CapabilityCheck for RoleTable {
    async fn can_perform(&self, action: Action, principal: &Principal) -> bool {
        let actions = self.actions_for(principal);
        debug!("{} may perform {:?}", principal, actions);
        actions.contains(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoleTable {
        RoleTable::new()
            .with_role(Role::Starter, "Starters")
            .with_role(Role::Status, "Members")
            .with_role(Role::Admin, "Ops")
    }

    #[tokio::test]
    async fn test_grants_follow_held_roles() {
        let table = table();
        let starter = Principal::new("alice", ["Starters"]);

        assert!(table.can_perform(Action::Start, &starter).await);
        assert!(!table.can_perform(Action::Stop, &starter).await);
        assert!(!table.can_perform(Action::Status, &starter).await);
    }

    #[tokio::test]
    async fn test_grants_are_unioned() {
        let table = table();
        let both = Principal::new("bob", ["Starters", "Members"]);

        let actions = table.actions_for(&both);
        assert!(actions.contains(&Action::Start));
        assert!(actions.contains(&Action::Status));
        assert!(actions.contains(&Action::Players));
        assert!(!actions.contains(&Action::Issue));
    }

    #[tokio::test]
    async fn test_unmapped_roles_grant_nothing() {
        let table = table();
        let stranger = Principal::new("carol", ["Visitors"]);
        assert!(table.actions_for(&stranger).is_empty());

        // Stopper exists as a role but nobody configured a name for it
        let would_be_stopper = Principal::new("dave", ["Stoppers"]);
        assert!(!table.can_perform(Action::Stop, &would_be_stopper).await);
    }

    #[tokio::test]
    async fn test_admin_can_do_everything() {
        let admin = Principal::new("root", ["Ops"]);
        for action in [
            Action::Start,
            Action::Stop,
            Action::Status,
            Action::Issue,
            Action::Players,
        ] {
            assert!(table().can_perform(action, &admin).await, "{}", action);
        }
    }

    #[test]
    fn test_role_table_from_config() {
        let mut config = PermissionsConfig::default();
        config.roles.insert("trusted".to_string(), "Regulars".to_string());
        config.roles.insert("Stopper".to_string(), "Night Shift".to_string());
        config.roles.insert("wizard".to_string(), "Wizards".to_string());

        let table = RoleTable::from_config(&config);
        let regular = Principal::new("eve", ["Regulars"]);
        let night = Principal::new("frank", ["Night Shift"]);
        let wizard = Principal::new("gandalf", ["Wizards"]);

        assert_eq!(
            table.actions_for(&regular).into_iter().collect::<Vec<_>>(),
            vec![Action::Start, Action::Status, Action::Players]
        );
        assert_eq!(
            table.actions_for(&night).into_iter().collect::<Vec<_>>(),
            vec![Action::Stop]
        );
        assert!(table.actions_for(&wizard).is_empty());
    }

    #[tokio::test]
    async fn test_allow_all() {
        let nobody = Principal::default();
        assert!(AllowAll.can_perform(Action::Issue, &nobody).await);
    }
}
