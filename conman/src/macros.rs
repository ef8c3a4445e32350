/// Define a header code with known variants and a catch-all for the rest.
///
/// A recorded frame may carry a protocol or interface number the loopback never writes itself,
/// decoding must not fail on those. Converts both ways with the underlying integer.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)*
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
        $( #[$enum_attr] )*
        pub enum $name {
            $( #[allow(missing_docs)] $variant, )+
            /// A code not written by this crate.
            Unknown($ty),
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant, )+
                    other => $name::Unknown(other),
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Unknown(other) => other,
                }
            }
        }
    }
}

/// Declare an unsized wrapper around a byte slice.
///
/// The wrapper gets two private constructors, `from_bytes` and `from_bytes_mut`, that do not
/// check any of its invariants.
macro_rules! byte_wrapper {
    (
        $( #[$attr:meta] )*
        pub struct $name:ident([u8])$(;)*
    ) => {
        #[allow(non_camel_case_types)]
        #[repr(transparent)]
        $( #[$attr] )*
        pub struct $name([u8]);

        impl $name {
            #[allow(dead_code)]
            fn from_bytes(data: &[u8]) -> &Self {
                // SAFETY: `Self` is a transparent wrapper of `[u8]`.
                unsafe { &*(data as *const [u8] as *const Self) }
            }

            #[allow(dead_code)]
            fn from_bytes_mut(data: &mut [u8]) -> &mut Self {
                // SAFETY: `Self` is a transparent wrapper of `[u8]`.
                unsafe { &mut *(data as *mut [u8] as *mut Self) }
            }
        }
    }
}

#[cfg(feature = "log")]
#[macro_use]
mod log {
    macro_rules! net_log {
        (trace, $($arg:expr),*) => { ::log::trace!($($arg),*); };
        (debug, $($arg:expr),*) => { ::log::debug!($($arg),*); };
        (warn, $($arg:expr),*) => { ::log::warn!($($arg),*); };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! net_log {
        ($level:ident, $($arg:expr),*) => { $( let _ = &$arg; )* }
    }
}

macro_rules! net_trace {
    ($($arg:expr),*) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),*) => (net_log!(debug, $($arg),*));
}

macro_rules! net_warn {
    ($($arg:expr),*) => (net_log!(warn, $($arg),*));
}
