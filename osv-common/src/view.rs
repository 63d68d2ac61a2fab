//! View identities and per-view containers
//!
//! The viewer keeps three orthogonal image stacks of the same volume in sync.
//! Every per-view table in the workspace is a [`ViewMap`], so a missing view
//! is a compile error rather than a runtime lookup failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// One of the orthogonal image stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Horizontal (top-down) slices
    Axial,
    /// Front-to-back slices
    Coronal,
    /// Left-to-right slices
    Sagittal,
}

impl View {
    /// Number of views
    pub const COUNT: usize = 3;

    /// Every view, in stable order
    pub const ALL: [View; View::COUNT] = [View::Axial, View::Coronal, View::Sagittal];

    /// Stable symbolic name (also the serialized form)
    pub fn name(self) -> &'static str {
        match self {
            View::Axial => "axial",
            View::Coronal => "coronal",
            View::Sagittal => "sagittal",
        }
    }

    /// All views except `self`, in stable order
    pub fn others(self) -> impl Iterator<Item = View> {
        View::ALL.into_iter().filter(move |v| *v != self)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axial" => Ok(View::Axial),
            "coronal" => Ok(View::Coronal),
            "sagittal" => Ok(View::Sagittal),
            other => Err(format!(
                "unknown view '{}' (expected axial, coronal or sagittal)",
                other
            )),
        }
    }
}

/// Ordered (source, target) pair of distinct views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewPair {
    pub source: View,
    pub target: View,
}

impl ViewPair {
    /// Build a pair; `None` when source and target are the same view
    pub fn new(source: View, target: View) -> Option<Self> {
        (source != target).then_some(Self { source, target })
    }

    /// Every ordered pair of distinct views (six for three views)
    pub fn all() -> impl Iterator<Item = ViewPair> {
        View::ALL
            .into_iter()
            .flat_map(|source| source.others().map(move |target| ViewPair { source, target }))
    }
}

impl fmt::Display for ViewPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// One value per view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMap<T> {
    pub axial: T,
    pub coronal: T,
    pub sagittal: T,
}

impl<T> ViewMap<T> {
    /// Build a map by evaluating `f` once per view
    pub fn from_fn(mut f: impl FnMut(View) -> T) -> Self {
        Self {
            axial: f(View::Axial),
            coronal: f(View::Coronal),
            sagittal: f(View::Sagittal),
        }
    }

    pub fn get(&self, view: View) -> &T {
        match view {
            View::Axial => &self.axial,
            View::Coronal => &self.coronal,
            View::Sagittal => &self.sagittal,
        }
    }

    pub fn get_mut(&mut self, view: View) -> &mut T {
        match view {
            View::Axial => &mut self.axial,
            View::Coronal => &mut self.coronal,
            View::Sagittal => &mut self.sagittal,
        }
    }

    /// Iterate `(view, value)` in stable view order
    pub fn iter(&self) -> impl Iterator<Item = (View, &T)> {
        View::ALL.into_iter().map(move |v| (v, self.get(v)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(View, &T) -> U) -> ViewMap<U> {
        ViewMap::from_fn(|v| f(v, self.get(v)))
    }
}

impl<T> Index<View> for ViewMap<T> {
    type Output = T;

    fn index(&self, view: View) -> &T {
        self.get(view)
    }
}

impl<T> IndexMut<View> for ViewMap<T> {
    fn index_mut(&mut self, view: View) -> &mut T {
        self.get_mut(view)
    }
}
