mod doorkeeper;
mod frequency;

pub(crate) use self::doorkeeper::Doorkeeper;
pub(crate) use self::frequency::FrequencySketch;
