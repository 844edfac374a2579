//! This module provides ways to tweak mocked calendars, so that they can return errors on some tests

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::error::{DavError, RequestKind};

/// This stores some behaviour tweaks, that describe how a mocked instance will behave during a given test
///
/// So that a functions fails _n_ times after _m_ initial successes, set `(m, n)` for the suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,
    /// If this is true, every action is refused with an authorization error (even when suspended)
    pub unauthorized: bool,

    // From the CalDavSource trait
    pub get_calendars_behaviour: (u32, u32),
    pub create_calendar_behaviour: (u32, u32),

    // From the DavCalendar trait
    pub list_behaviour: (u32, u32),
    pub fetch_by_uid_behaviour: (u32, u32),
    pub create_behaviour: (u32, u32),
    pub update_behaviour: (u32, u32),
    pub delete_behaviour: (u32, u32),

    /// How long listing calendars and listing tasks take
    pub latency: Duration,

    /// How many times each action has been attempted
    calls: BTreeMap<&'static str, u32>,
    in_flight: u32,
    max_in_flight: u32,
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            get_calendars_behaviour: (0, n_fails),
            create_calendar_behaviour: (0, n_fails),
            list_behaviour: (0, n_fails),
            fetch_by_uid_behaviour: (0, n_fails),
            create_behaviour: (0, n_fails),
            update_behaviour: (0, n_fails),
            delete_behaviour: (0, n_fails),
            ..Self::default()
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    /// How many times an action (e.g. `"get_calendars"`) has been attempted
    pub fn calls(&self, action: &str) -> u32 {
        self.calls.get(action).copied().unwrap_or(0)
    }

    /// The highest number of delayed requests that were pending at the same time
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    /// Start a delayed request. Returns how long it must wait
    pub(crate) fn begin_request(&mut self) -> Duration {
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
        self.latency
    }

    pub(crate) fn end_request(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn can_get_calendars(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("get_calendars", RequestKind::Listing, url)
    }
    pub fn can_create_calendar(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("create_calendar", RequestKind::CollectionCreation, url)
    }
    pub fn can_list(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("list", RequestKind::Report, url)
    }
    pub fn can_fetch_by_uid(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("fetch_by_uid", RequestKind::Report, url)
    }
    pub fn can_create(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("create", RequestKind::Creation, url)
    }
    pub fn can_update(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("update", RequestKind::Creation, url)
    }
    pub fn can_delete(&mut self, url: &Url) -> Result<(), DavError> {
        self.check("delete", RequestKind::Deletion, url)
    }

    fn check(&mut self, action: &'static str, kind: RequestKind, url: &Url) -> Result<(), DavError> {
        *self.calls.entry(action).or_insert(0) += 1;

        if self.unauthorized {
            log::debug!("Mock behaviour: refusing a {} (unauthorized)", action);
            return Err(DavError::Authorization{ url: url.clone(), reason: "Mocked credentials are refused".to_string() });
        }
        if self.is_suspended { return Ok(()) }

        let value = match action {
            "get_calendars" => &mut self.get_calendars_behaviour,
            "create_calendar" => &mut self.create_calendar_behaviour,
            "list" => &mut self.list_behaviour,
            "fetch_by_uid" => &mut self.fetch_by_uid_behaviour,
            "create" => &mut self.create_behaviour,
            "update" => &mut self.update_behaviour,
            _ => &mut self.delete_behaviour,
        };
        decrement(value, action).map_err(|reason| DavError::Protocol{ kind, url: url.clone(), status: 500, reason })
    }
}


/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), String> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value))
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mock_behaviour() {
        let url: Url = "https://mock/calendars/".parse().unwrap();

        let mut ok = MockBehaviour::new();
        for _ in 0..7 {
            assert!(ok.can_get_calendars(&url).is_ok());
        }
        assert_eq!(ok.calls("get_calendars"), 7);

        let mut now = MockBehaviour::fail_now(2);
        assert!(now.can_get_calendars(&url).is_err());
        assert!(now.can_create_calendar(&url).is_err());
        assert!(now.can_create_calendar(&url).is_err());
        assert!(now.can_get_calendars(&url).is_err());
        assert!(now.can_get_calendars(&url).is_ok());
        assert!(now.can_get_calendars(&url).is_ok());
        assert!(now.can_create_calendar(&url).is_ok());

        let mut custom = MockBehaviour{
            get_calendars_behaviour: (0,1),
            delete_behaviour: (1,3),
            ..MockBehaviour::default()
        };
        assert!(custom.can_get_calendars(&url).is_err());
        for _ in 0..6 {
            assert!(custom.can_get_calendars(&url).is_ok());
        }
        assert!(custom.can_delete(&url).is_ok());
        assert!(custom.can_delete(&url).is_err());
        assert!(custom.can_delete(&url).is_err());
        assert!(custom.can_delete(&url).is_err());
        assert!(custom.can_delete(&url).is_ok());
        assert!(custom.can_delete(&url).is_ok());
    }

    #[test]
    fn test_unauthorized() {
        let url: Url = "https://mock/calendars/".parse().unwrap();
        let mut behaviour = MockBehaviour{ unauthorized: true, ..MockBehaviour::default() };
        behaviour.suspend();

        let err = behaviour.can_list(&url).unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(behaviour.calls("list"), 1);
    }
}
