//! Bounded collection of monitoring lists. Cleanup is lazy: every public
//! entry point first drops lapsed lists, then does its work. Ids are handed
//! out monotonically and never reused within the process lifetime.

use std::sync::Arc;
use std::time::Instant;

use devparam_domain::{
    MonitoringListId, MonitoringListInfo, ParameterInstanceId, ParameterResponse, StatusCode,
};

use crate::clock::Clock;

const MAX_LIVE_LISTS: usize = 100;

#[derive(Debug, Clone)]
pub struct MonitoringList {
    pub info: MonitoringListInfo,
    pub last_access: Instant,
    /// The resolved instance references, re-dispatched on every read.
    pub ids: Vec<ParameterInstanceId>,
    /// Slots pre-determined at creation (unknown ids keep their error).
    pub template: Vec<ParameterResponse>,
}

pub struct MonitoringListCollection {
    slots: Vec<Option<MonitoringList>>,
    next_id: u64,
    clock: Arc<dyn Clock>,
}

impl MonitoringListCollection {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MonitoringListCollection {
            slots: Vec::new(),
            next_id: 1,
            clock,
        }
    }

    pub fn create(
        &mut self,
        ids: Vec<ParameterInstanceId>,
        template: Vec<ParameterResponse>,
        timeout_seconds: u16,
    ) -> Result<MonitoringListInfo, StatusCode> {
        self.cleanup();

        let free_slot = self.slots.iter().position(|s| s.is_none());
        if free_slot.is_none() && self.slots.len() >= MAX_LIVE_LISTS {
            return Err(StatusCode::MonitoringListMaxExceeded);
        }

        let id = MonitoringListId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let info = MonitoringListInfo {
            id,
            one_off: timeout_seconds == 0,
            timeout_seconds,
        };
        let list = MonitoringList {
            info,
            last_access: self.clock.now(),
            ids,
            template,
        };
        match free_slot {
            Some(slot) => self.slots[slot] = Some(list),
            None => self.slots.push(Some(list)),
        }
        Ok(info)
    }

    /// Fetch a list for reading: refreshes `last_access`, removes one-off
    /// lists on the way out.
    pub fn take_for_read(&mut self, id: MonitoringListId) -> Result<MonitoringList, StatusCode> {
        self.cleanup();
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|l| l.info.id == id) {
                let list = slot.as_mut().unwrap();
                list.last_access = self.clock.now();
                let snapshot = list.clone();
                if snapshot.info.one_off {
                    *slot = None;
                }
                return Ok(snapshot);
            }
        }
        Err(StatusCode::UnknownMonitoringList)
    }

    /// Info lookup; refreshes `last_access` like a read (and consumes one-off
    /// lists).
    pub fn info(&mut self, id: MonitoringListId) -> Result<MonitoringListInfo, StatusCode> {
        self.take_for_read(id).map(|l| l.info)
    }

    /// Snapshot of every live list. Does not refresh `last_access`.
    pub fn infos(&mut self) -> Vec<MonitoringListInfo> {
        self.cleanup();
        self.slots
            .iter()
            .flatten()
            .map(|l| l.info)
            .collect()
    }

    pub fn delete(&mut self, id: MonitoringListId) -> StatusCode {
        self.cleanup();
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|l| l.info.id == id) {
                *slot = None;
                return StatusCode::Success;
            }
        }
        StatusCode::UnknownMonitoringList
    }

    pub fn cleanup(&mut self) {
        let now = self.clock.now();
        for slot in &mut self.slots {
            let lapsed = slot.as_ref().is_some_and(|l| {
                !l.info.one_off
                    && now.duration_since(l.last_access).as_secs() > u64::from(l.info.timeout_seconds)
            });
            if lapsed {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn collection() -> (Arc<ManualClock>, MonitoringListCollection) {
        let clock = Arc::new(ManualClock::new());
        let lists = MonitoringListCollection::new(clock.clone());
        (clock, lists)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let (_clock, mut lists) = collection();
        let first = lists.create(vec![], vec![], 5).unwrap();
        assert_eq!(first.id, MonitoringListId(1));
        assert_eq!(lists.delete(first.id), StatusCode::Success);
        let second = lists.create(vec![], vec![], 5).unwrap();
        assert_eq!(second.id, MonitoringListId(2));
    }

    #[test]
    fn lapsed_list_disappears() {
        let (clock, mut lists) = collection();
        let info = lists.create(vec![], vec![], 5).unwrap();
        clock.advance(Duration::from_secs(6));
        assert_eq!(
            lists.take_for_read(info.id).unwrap_err(),
            StatusCode::UnknownMonitoringList
        );
    }

    #[test]
    fn read_refreshes_last_access() {
        let (clock, mut lists) = collection();
        let info = lists.create(vec![], vec![], 5).unwrap();
        clock.advance(Duration::from_secs(4));
        assert!(lists.take_for_read(info.id).is_ok());
        clock.advance(Duration::from_secs(4));
        // 8s since creation but only 4s since last read
        assert!(lists.take_for_read(info.id).is_ok());
    }

    #[test]
    fn get_all_does_not_refresh() {
        let (clock, mut lists) = collection();
        let info = lists.create(vec![], vec![], 5).unwrap();
        clock.advance(Duration::from_secs(4));
        assert_eq!(lists.infos().len(), 1);
        clock.advance(Duration::from_secs(2));
        assert!(lists.infos().is_empty());
        assert_eq!(
            lists.take_for_read(info.id).unwrap_err(),
            StatusCode::UnknownMonitoringList
        );
    }

    #[test]
    fn one_off_list_is_consumed_by_first_read() {
        let (_clock, mut lists) = collection();
        let info = lists.create(vec![], vec![], 0).unwrap();
        assert!(info.one_off);
        assert!(lists.take_for_read(info.id).is_ok());
        assert_eq!(
            lists.take_for_read(info.id).unwrap_err(),
            StatusCode::UnknownMonitoringList
        );
    }

    #[test]
    fn capacity_is_bounded() {
        let (_clock, mut lists) = collection();
        for _ in 0..100 {
            lists.create(vec![], vec![], 5).unwrap();
        }
        assert_eq!(
            lists.create(vec![], vec![], 5).unwrap_err(),
            StatusCode::MonitoringListMaxExceeded
        );
    }
}
