#![macro_use]
#![allow(unused_macros)]

// Forward to defmt when the feature is enabled, evaluate-and-drop otherwise
// so log statements never change what compiles.

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-03")]
        ::defmt::trace!($s $(, $x)*);
        #[cfg(not(feature = "defmt-03"))]
        let _ = ($( & $x ),*);
    }};
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($s $(, $x)*);
        #[cfg(not(feature = "defmt-03"))]
        let _ = ($( & $x ),*);
    }};
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-03")]
        ::defmt::info!($s $(, $x)*);
        #[cfg(not(feature = "defmt-03"))]
        let _ = ($( & $x ),*);
    }};
}

macro_rules! warning {
    ($s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($s $(, $x)*);
        #[cfg(not(feature = "defmt-03"))]
        let _ = ($( & $x ),*);
    }};
}
