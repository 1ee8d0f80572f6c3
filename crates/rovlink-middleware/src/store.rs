//! Latest-value sensor state store.
//!
//! Each fixed channel lives in its own [`tokio::sync::watch`] cell, so a write
//! is a single value swap and any number of readers can either poll the
//! current value or await the next change.  Buttons are keyed by id and kept
//! in a read-write-locked map.  Every write is additionally published as a
//! [`SensorUpdate`] on a broadcast channel for observers that want the whole
//! update stream.
//!
//! The store has exactly one writer, the telemetry receiver; the mutating
//! methods are crate-private.  Reads of different channels are independent:
//! a reader may see `pos` and `gps` from different telemetry lines.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rovlink_types::{
    Channel, GpsFix, LocalPose, RawImage, SensorGeometry, SensorSnapshot, SensorUpdate,
    SensorValue, UltrasonicReading,
};
use tokio::sync::{broadcast, watch};

/// Number of buffered updates before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

fn cell<T>() -> watch::Sender<Option<T>> {
    watch::channel(None).0
}

#[derive(Debug)]
pub struct SensorStore {
    geometry: SensorGeometry,
    reward: watch::Sender<Option<i64>>,
    gps: watch::Sender<Option<GpsFix>>,
    pos: watch::Sender<Option<LocalPose>>,
    sense: watch::Sender<Option<Vec<f64>>>,
    distance_front: watch::Sender<Option<Vec<f64>>>,
    ultrasonic: Vec<watch::Sender<Option<UltrasonicReading>>>,
    image: watch::Sender<Option<Arc<RawImage>>>,
    buttons: RwLock<HashMap<i64, bool>>,
    updates: broadcast::Sender<SensorUpdate>,
}

impl SensorStore {
    /// Create an empty store; one `ultrasonic` channel is allocated per sensor
    /// in `geometry`.
    pub fn new(geometry: SensorGeometry) -> Self {
        Self::with_capacity(geometry, DEFAULT_CAPACITY)
    }

    /// Like [`new`][Self::new] with an explicit update-channel capacity.
    pub fn with_capacity(geometry: SensorGeometry, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        Self {
            ultrasonic: (0..geometry.len()).map(|_| cell()).collect(),
            geometry,
            reward: cell(),
            gps: cell(),
            pos: cell(),
            sense: cell(),
            distance_front: cell(),
            image: cell(),
            buttons: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn reward(&self) -> Option<i64> {
        *self.reward.borrow()
    }

    pub fn gps(&self) -> Option<GpsFix> {
        *self.gps.borrow()
    }

    pub fn pos(&self) -> Option<LocalPose> {
        *self.pos.borrow()
    }

    /// Full range vector from the last `sense` line.
    pub fn sense(&self) -> Option<Vec<f64>> {
        self.sense.borrow().clone()
    }

    /// The first `N` ranges of the last `sense` line.
    pub fn distance_front(&self) -> Option<Vec<f64>> {
        self.distance_front.borrow().clone()
    }

    /// Reading of sensor `index`; `None` if out of range or not yet received.
    pub fn ultrasonic(&self, index: usize) -> Option<UltrasonicReading> {
        self.ultrasonic.get(index).and_then(|cell| *cell.borrow())
    }

    /// Latest camera frame.
    pub fn image(&self) -> Option<Arc<RawImage>> {
        self.image.borrow().clone()
    }

    pub fn button(&self, id: i64) -> Option<bool> {
        self.buttons
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    /// Read every channel in turn.
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            reward: self.reward(),
            gps: self.gps(),
            pos: self.pos(),
            sense: self.sense(),
            distance_front: self.distance_front(),
            ultrasonic: (0..self.ultrasonic.len())
                .map(|i| self.ultrasonic(i))
                .collect(),
            image_size: self.image().map(|img| (img.width, img.height)),
            buttons: self
                .buttons
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(id, state)| (*id, *state))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    // -----------------------------------------------------------------------
    // Change notification
    // -----------------------------------------------------------------------

    /// Every channel write, in wire order.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorUpdate> {
        self.updates.subscribe()
    }

    pub fn watch_reward(&self) -> watch::Receiver<Option<i64>> {
        self.reward.subscribe()
    }

    pub fn watch_gps(&self) -> watch::Receiver<Option<GpsFix>> {
        self.gps.subscribe()
    }

    pub fn watch_pos(&self) -> watch::Receiver<Option<LocalPose>> {
        self.pos.subscribe()
    }

    pub fn watch_sense(&self) -> watch::Receiver<Option<Vec<f64>>> {
        self.sense.subscribe()
    }

    pub fn watch_image(&self) -> watch::Receiver<Option<Arc<RawImage>>> {
        self.image.subscribe()
    }

    // -----------------------------------------------------------------------
    // Writer side (telemetry receiver only)
    // -----------------------------------------------------------------------

    pub(crate) fn set_reward(&self, reward: i64) {
        self.reward.send_replace(Some(reward));
        self.publish(Channel::Reward, SensorValue::Reward(reward), Utc::now());
    }

    pub(crate) fn set_gps(&self, fix: GpsFix) {
        self.gps.send_replace(Some(fix));
        self.publish(Channel::Gps, SensorValue::Gps(fix), Utc::now());
    }

    pub(crate) fn set_pos(&self, pose: LocalPose) {
        self.pos.send_replace(Some(pose));
        self.publish(Channel::Pos, SensorValue::Pos(pose), Utc::now());
    }

    /// Store a `sense` vector and derive `distance/front` and the per-sensor
    /// channels from it.  `ranges` must hold at least `N` values.
    pub(crate) fn set_ranges(&self, ranges: Vec<f64>) {
        debug_assert!(ranges.len() >= self.geometry.len());
        let now = Utc::now();
        let front: Vec<f64> = ranges.iter().take(self.geometry.len()).copied().collect();

        self.sense.send_replace(Some(ranges.clone()));
        self.publish(Channel::Sense, SensorValue::Ranges(ranges), now);

        self.distance_front.send_replace(Some(front.clone()));
        let value = SensorValue::Ranges(front.clone());
        self.publish(Channel::DistanceFront, value, now);

        let sensors = self.ultrasonic.iter().zip(self.geometry.angles()).zip(&front);
        for (i, ((cell, angle), distance)) in sensors.enumerate() {
            let reading = UltrasonicReading {
                distance: *distance,
                angle_rad: *angle,
            };
            cell.send_replace(Some(reading));
            let value = SensorValue::Ultrasonic(reading);
            self.publish(Channel::Ultrasonic(i), value, now);
        }
    }

    pub(crate) fn set_image(&self, frame: RawImage) {
        let frame = Arc::new(frame);
        self.image.send_replace(Some(Arc::clone(&frame)));
        self.publish(Channel::Image, SensorValue::Image(frame), Utc::now());
    }

    pub(crate) fn set_button(&self, id: i64, pressed: bool) {
        self.buttons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, pressed);
        let value = SensorValue::Button(pressed);
        self.publish(Channel::Button(id), value, Utc::now());
    }

    fn publish(&self, channel: Channel, value: SensorValue, received_at: DateTime<Utc>) {
        // No subscribers is the normal case.
        let _ = self.updates.send(SensorUpdate {
            channel,
            value,
            received_at,
        });
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new(SensorGeometry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_start_absent() {
        let store = SensorStore::default();
        assert!(store.reward().is_none());
        assert!(store.gps().is_none());
        assert!(store.image().is_none());
        assert!(store.ultrasonic(0).is_none());
        assert!(store.button(1).is_none());
    }

    #[test]
    fn ranges_fan_out_to_derived_channels() {
        let store = SensorStore::default();
        store.set_ranges(vec![0.1, 0.2, 0.3, 0.4, 0.9]);

        assert_eq!(store.sense().unwrap(), vec![0.1, 0.2, 0.3, 0.4, 0.9]);
        assert_eq!(store.distance_front().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        let reading = store.ultrasonic(2).unwrap();
        assert_eq!(reading.distance, 0.3);
        assert_eq!(reading.angle_rad, store.geometry().angle(2).unwrap());
        assert!(store.ultrasonic(4).is_none());
    }

    #[test]
    fn channels_keep_only_latest_value() {
        let store = SensorStore::default();
        store.set_reward(1);
        store.set_reward(-4);
        assert_eq!(store.reward(), Some(-4));

        store.set_button(2, true);
        store.set_button(2, false);
        assert_eq!(store.button(2), Some(false));
    }

    #[tokio::test]
    async fn updates_are_published_in_write_order() {
        let store = SensorStore::new(SensorGeometry::from_degrees(&[30.0, -30.0]));
        let mut rx = store.subscribe();

        store.set_reward(7);
        store.set_ranges(vec![1.0, 2.0, 3.0]);

        let channels: Vec<Channel> = (0..5)
            .map(|_| rx.try_recv().unwrap().channel)
            .collect();
        assert_eq!(
            channels,
            vec![
                Channel::Reward,
                Channel::Sense,
                Channel::DistanceFront,
                Channel::Ultrasonic(0),
                Channel::Ultrasonic(1),
            ]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn watch_receiver_sees_change() {
        let store = SensorStore::default();
        let mut rx = store.watch_pos();
        let pose = LocalPose {
            x: 1.0,
            y: 2.0,
            z: 0.0,
            heading: 90.0,
        };
        store.set_pos(pose);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(pose));
    }

    #[test]
    fn concurrent_reader_never_sees_torn_values() {
        let store = Arc::new(SensorStore::default());
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    if let Some(fix) = store.gps() {
                        assert_eq!(fix.latitude, fix.longitude);
                        assert_eq!(fix.altitude, fix.heading);
                    }
                }
            })
        };
        for i in 0..10_000 {
            let v = i as f64;
            store.set_gps(GpsFix {
                latitude: v,
                longitude: v,
                altitude: -v,
                heading: -v,
            });
        }
        reader.join().unwrap();
    }

    #[test]
    fn snapshot_collects_every_channel() {
        let store = SensorStore::default();
        store.set_reward(3);
        store.set_button(9, true);
        store.set_image(RawImage {
            width: 2,
            height: 1,
            data: vec![0; 6],
        });
        let snap = store.snapshot();
        assert_eq!(snap.reward, Some(3));
        assert_eq!(snap.image_size, Some((2, 1)));
        assert_eq!(snap.buttons.get(&9), Some(&true));
        assert_eq!(snap.ultrasonic.len(), 4);
        assert!(snap.gps.is_none());
    }
}
