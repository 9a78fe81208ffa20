/// A named PSF dependency (image position, color, ...)
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Parameter {
    pub(crate) name: String,
    pub(crate) offset: f64,
    pub(crate) scale: f64,
}
impl Parameter {
    fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            offset: 0f64,
            scale: 1f64,
        }
    }
}

/// Ordered list of the parameters the PSF model depends on
///
/// A [`Set`](crate::Set) copies the names, offsets and scales at construction
/// and never refers back to the context afterwards.
///
/// # Example
///
/// ```rust
/// use psf_samples::Context;
///
/// let context = Context::new(["X_IMAGE", "Y_IMAGE"])
///     .offset(0, 1024.)
///     .scale(0, 2048.);
/// assert_eq!(context.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub(crate) parameters: Vec<Parameter>,
}
impl Context {
    /// Creates a context from the parameter names, with offsets at 0 and scales at 1
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            parameters: names.into_iter().map(Parameter::new).collect(),
        }
    }
    /// Sets the offset of the parameter at `index`, ignored if out of range
    pub fn offset(mut self, index: usize, value: f64) -> Self {
        if let Some(p) = self.parameters.get_mut(index) {
            p.offset = value;
        }
        self
    }
    /// Sets the scale of the parameter at `index`, ignored if out of range
    pub fn scale(mut self, index: usize, value: f64) -> Self {
        if let Some(p) = self.parameters.get_mut(index) {
            p.scale = value;
        }
        self
    }
    /// Number of context parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }
}
