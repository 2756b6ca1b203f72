/// What to do when a one-to-one relation finds several rows for one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OneToOnePolicy {
    /// Keep the first row in the child's sort order.
    #[default]
    FirstBySort,
    /// Fail the resolution with `Error::AmbiguousOneToOne`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Appended to a query name to form its remote count method.
    pub count_suffix: String,
    /// Maximum relation depth a body may declare. `None` is unbounded.
    pub max_depth: Option<usize>,
    pub one_to_one: OneToOnePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            count_suffix: ".count".to_string(),
            max_depth: None,
            one_to_one: OneToOnePolicy::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.count_suffix = suffix.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_one_to_one(mut self, policy: OneToOnePolicy) -> Self {
        self.one_to_one = policy;
        self
    }

    pub(crate) fn count_method(&self, name: &str) -> String {
        format!("{}{}", name, self.count_suffix)
    }
}
