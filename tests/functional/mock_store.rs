//! In-memory cluster store and policy builders for functional tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use freeze_operator::crd::{
    Action, ChangeFreeze, ChangeFreezeSpec, FreezeException, FreezeExceptionSpec,
    MODE_DENY_OUTSIDE_WINDOWS, MaintenanceWindow, MaintenanceWindowSpec,
    MaintenanceWindowWindowSpec, MessageSpec, PolicyBehaviorSpec, PolicyRulesSpec, TargetKind,
    TargetSpec,
};
use freeze_operator::policy::{ClusterStore, StoreError};

/// A cluster store that serves fixed policy lists and namespaces.
#[derive(Default)]
pub struct MockStore {
    pub freezes: Vec<ChangeFreeze>,
    pub windows: Vec<MaintenanceWindow>,
    pub exceptions: Vec<FreezeException>,
    pub namespaces: BTreeMap<String, BTreeMap<String, String>>,
    /// When set, every list call fails with this message.
    pub fail_lists: Option<String>,
}

impl MockStore {
    pub fn with_namespace(mut self, name: &str, labels: &[(&str, &str)]) -> Self {
        self.namespaces.insert(
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl ClusterStore for MockStore {
    async fn change_freezes(&self) -> Result<Vec<ChangeFreeze>, StoreError> {
        match &self.fail_lists {
            Some(message) => Err(StoreError::Fault(message.clone())),
            None => Ok(self.freezes.clone()),
        }
    }

    async fn maintenance_windows(&self) -> Result<Vec<MaintenanceWindow>, StoreError> {
        match &self.fail_lists {
            Some(message) => Err(StoreError::Fault(message.clone())),
            None => Ok(self.windows.clone()),
        }
    }

    async fn freeze_exceptions(&self) -> Result<Vec<FreezeException>, StoreError> {
        match &self.fail_lists {
            Some(message) => Err(StoreError::Fault(message.clone())),
            None => Ok(self.exceptions.clone()),
        }
    }

    async fn namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        Ok(self.namespaces.get(name).cloned())
    }
}

/// Target selecting namespaces labeled `env=prod`, any object, the given kinds.
pub fn prod_target(kinds: Vec<TargetKind>) -> TargetSpec {
    TargetSpec {
        namespace_selector: Some(LabelSelector {
            match_labels: Some([("env".to_string(), "prod".to_string())].into()),
            match_expressions: None,
        }),
        object_selector: None,
        kinds,
    }
}

pub fn change_freeze(
    name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    target: TargetSpec,
    deny: Vec<Action>,
    reason: &str,
) -> ChangeFreeze {
    ChangeFreeze::new(
        name,
        ChangeFreezeSpec {
            start_time: start,
            end_time: end,
            timezone: None,
            target,
            rules: PolicyRulesSpec { deny },
            behavior: PolicyBehaviorSpec::default(),
            message: MessageSpec {
                reason: reason.to_string(),
                ..Default::default()
            },
        },
    )
}

pub fn maintenance_window(
    name: &str,
    timezone: &str,
    windows: Vec<(&str, &str, &str)>,
    target: TargetSpec,
    deny: Vec<Action>,
) -> MaintenanceWindow {
    MaintenanceWindow::new(
        name,
        MaintenanceWindowSpec {
            timezone: timezone.to_string(),
            mode: MODE_DENY_OUTSIDE_WINDOWS.to_string(),
            windows: windows
                .into_iter()
                .map(|(name, schedule, duration)| MaintenanceWindowWindowSpec {
                    name: name.to_string(),
                    schedule: schedule.to_string(),
                    duration: duration.to_string(),
                })
                .collect(),
            target,
            rules: PolicyRulesSpec { deny },
            behavior: PolicyBehaviorSpec::default(),
            message: MessageSpec::default(),
        },
    )
}

pub fn freeze_exception(
    name: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    target: TargetSpec,
    allow: Vec<Action>,
    reason: &str,
) -> FreezeException {
    FreezeException::new(
        name,
        FreezeExceptionSpec {
            active_from: from,
            active_to: to,
            target,
            allow,
            constraints: None,
            reason: reason.to_string(),
            ticket_url: String::new(),
            approved_by: String::new(),
        },
    )
}
