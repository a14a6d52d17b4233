//! Mutation origin tags

/// Origin of a model mutation.
///
/// Used solely to break broadcast echo loops: a broadcaster never
/// re-emits an event whose source equals its own tag. Exactly one
/// value (`Local`) represents this process; every other value means
/// the mutation arrived over the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// Mutation made by this process (UI, config, preset load).
    Local,
    /// Mutation applied from a datagram received over OSC.
    RemoteOsc,
}

impl ChangeSource {
    #[inline]
    pub fn is_local(self) -> bool {
        matches!(self, ChangeSource::Local)
    }
}
