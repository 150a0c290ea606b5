//! Campaign channels and the channel registry.
//!
//! Channels are created once from the case sheet. Subscriptions are attached
//! during setup and read when each case is provisioned; nothing mutates a
//! channel after the batch is scheduled.

use std::collections::{BTreeMap, HashMap};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::binding::BindingKind;
use crate::error::{CampaignError, CampaignResult};
use crate::expr::Transform;

/// Attribute of an object in the model tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub object_path: String,
    pub attribute: String,
}

impl Destination {
    pub fn new(object_path: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            object_path: object_path.into(),
            attribute: attribute.into(),
        }
    }
}

/// Piecewise signal for one case as `(time, value)` points.
///
/// The first point is the initial value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalSeries {
    pub points: Vec<(f64, f64)>,
}

impl SignalSeries {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Single constant value starting at t = 0.
    pub fn constant(value: f64) -> Self {
        Self {
            points: vec![(0.0, value)],
        }
    }

    pub fn initial(&self) -> Option<f64> {
        self.points.first().map(|(_, v)| *v)
    }
}

/// One step of applying a signal subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Write the value to the attribute directly
    Initial(f64),
    /// Parameter event at `time`; `ramp` is the ramp duration if any
    Event {
        time: f64,
        value: f64,
        ramp: Option<f64>,
    },
}

/// Per-rank maps arrive with string keys (`{"1": ...}`).
fn rank_keys<'de, D, T>(deserializer: D) -> Result<BTreeMap<u32, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    BTreeMap::<String, T>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            key.trim()
                .parse::<u32>()
                .map(|rank| (rank, value))
                .map_err(|_| D::Error::custom(format!("invalid rank key '{}'", key)))
        })
        .collect()
}

/// A transform registered on a signal channel.
#[derive(Debug, Clone)]
pub struct SignalSubscription {
    pub destination: Destination,
    pub kind: BindingKind,
    pub transform: Transform,
}

impl SignalSubscription {
    /// Compute the assignments for one case's series.
    ///
    /// The transform is evaluated once per point, with `x` bound to the
    /// point's value.
    pub fn plan(&self, series: &SignalSeries) -> CampaignResult<Vec<Assignment>> {
        let points = &series.points;
        let Some(&(_, first)) = points.first() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        match self.kind {
            BindingKind::SetInitial => {
                out.push(Assignment::Initial(self.transform.apply(first)?));
            }
            BindingKind::Set | BindingKind::Constant => {
                out.push(Assignment::Initial(self.transform.apply(first)?));
                for &(time, value) in &points[1..] {
                    out.push(Assignment::Event {
                        time,
                        value: self.transform.apply(value)?,
                        ramp: None,
                    });
                }
            }
            BindingKind::Ramp => {
                out.push(Assignment::Initial(self.transform.apply(first)?));
                for pair in points.windows(2) {
                    let (t0, _) = pair[0];
                    let (t1, v1) = pair[1];
                    out.push(Assignment::Event {
                        time: t0,
                        value: self.transform.apply(v1)?,
                        ramp: Some(t1 - t0),
                    });
                }
            }
            BindingKind::Trigger => {
                for pair in points.windows(2) {
                    let (_, v0) = pair[0];
                    let (t1, v1) = pair[1];
                    if v1 != v0 {
                        out.push(Assignment::Event {
                            time: t1,
                            value: self.transform.apply(v1)?,
                            ramp: None,
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

/// A time-varying reference signal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignalChannel {
    pub name: String,
    /// Series per case rank
    #[serde(default = "BTreeMap::new", deserialize_with = "rank_keys")]
    pub values: BTreeMap<u32, SignalSeries>,
    /// Used for ranks without an explicit series
    #[serde(default)]
    pub default: Option<SignalSeries>,
    #[serde(skip)]
    subscriptions: Vec<SignalSubscription>,
}

impl SignalChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, rank: u32, series: SignalSeries) -> Self {
        self.values.insert(rank, series);
        self
    }

    pub fn with_default(mut self, series: SignalSeries) -> Self {
        self.default = Some(series);
        self
    }

    /// Continuous set subscription.
    pub fn add_set(&mut self, destination: Destination, transform: Transform) {
        self.subscribe(destination, BindingKind::Set, transform);
    }

    /// Initial value only.
    pub fn add_set_initial(&mut self, destination: Destination, transform: Transform) {
        self.subscribe(destination, BindingKind::SetInitial, transform);
    }

    /// Ramped parameter events.
    pub fn add_ramp(&mut self, destination: Destination, transform: Transform) {
        self.subscribe(destination, BindingKind::Ramp, transform);
    }

    /// Events on value changes.
    pub fn add_trigger(&mut self, destination: Destination, transform: Transform) {
        self.subscribe(destination, BindingKind::Trigger, transform);
    }

    fn subscribe(&mut self, destination: Destination, kind: BindingKind, transform: Transform) {
        self.subscriptions.push(SignalSubscription {
            destination,
            kind,
            transform,
        });
    }

    pub fn subscriptions(&self) -> &[SignalSubscription] {
        &self.subscriptions
    }

    /// Series for a case.
    pub fn series(&self, rank: u32) -> CampaignResult<&SignalSeries> {
        self.values
            .get(&rank)
            .or(self.default.as_ref())
            .ok_or_else(|| CampaignError::MissingChannelValue {
                name: self.name.clone(),
                rank,
            })
    }
}

/// A channel carrying one fixed value per case.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueChannel<T> {
    pub name: String,
    #[serde(default = "BTreeMap::new", deserialize_with = "rank_keys")]
    pub values: BTreeMap<u32, T>,
    #[serde(default = "Option::default")]
    pub default: Option<T>,
    #[serde(skip)]
    destinations: Vec<Destination>,
}

impl<T> ValueChannel<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
            default: None,
            destinations: Vec::new(),
        }
    }

    pub fn with_value(mut self, rank: u32, value: T) -> Self {
        self.values.insert(rank, value);
        self
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    /// Register a direct binding; no transform is applied.
    pub fn add_destination(&mut self, destination: Destination) {
        self.destinations.push(destination);
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Value for a case.
    pub fn value(&self, rank: u32) -> CampaignResult<&T> {
        self.values
            .get(&rank)
            .or(self.default.as_ref())
            .ok_or_else(|| CampaignError::MissingChannelValue {
                name: self.name.clone(),
                rank,
            })
    }
}

/// Named unit of campaign configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    Signal(SignalChannel),
    Constant(ValueChannel<f64>),
    /// Value is the path of a model object
    #[serde(rename = "object")]
    ObjectReference(ValueChannel<String>),
    String(ValueChannel<String>),
}

impl Channel {
    pub fn name(&self) -> &str {
        match self {
            Channel::Signal(c) => &c.name,
            Channel::Constant(c) => &c.name,
            Channel::ObjectReference(c) => &c.name,
            Channel::String(c) => &c.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Channel::Signal(_) => "signal",
            Channel::Constant(_) => "constant",
            Channel::ObjectReference(_) => "object",
            Channel::String(_) => "string",
        }
    }

    /// Number of registered subscriptions or direct bindings.
    pub fn binding_count(&self) -> usize {
        match self {
            Channel::Signal(c) => c.subscriptions().len(),
            Channel::Constant(c) => c.destinations().len(),
            Channel::ObjectReference(c) => c.destinations().len(),
            Channel::String(c) => c.destinations().len(),
        }
    }
}

/// Ordered collection of uniquely named channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
}

impl ChannelRegistry {
    /// Build a registry; names are case-sensitive and must be unique.
    pub fn new(channels: Vec<Channel>) -> CampaignResult<Self> {
        let mut index = HashMap::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            if index.insert(channel.name().to_string(), i).is_some() {
                return Err(CampaignError::DuplicateChannel(channel.name().to_string()));
            }
        }
        Ok(Self { channels, index })
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.index.get(name).map(|&i| &self.channels[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.index.get(name).map(|&i| &mut self.channels[i])
    }

    /// Channels in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total number of registered bindings across all channels.
    pub fn binding_count(&self) -> usize {
        self.channels.iter().map(Channel::binding_count).sum()
    }
}
