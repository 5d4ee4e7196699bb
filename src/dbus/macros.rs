/// Declares an enum decoded from a wire primitive.
///
/// The raw type is either `str` (string-valued enums such as chassis or
/// connectivity-check states) or an integer type.
///
/// # Example
/// ```ignore
/// wire_enum! {
///     /// Device states.
///     pub enum DeviceState: u32 {
///         Unknown = 0,
///         Activated = 100,
///     }
/// }
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : str {
            $($(#[$variant_meta:meta])* $variant:ident = $raw:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $crate::dbus::WireEnum for $name {
            type Raw = ::std::string::String;

            const TYPE_NAME: &'static str = ::std::stringify!($name);

            fn members() -> &'static [Self] {
                &[$(Self::$variant),+]
            }

            fn raw(&self) -> Self::Raw {
                match self {
                    $(Self::$variant => ::std::string::String::from($raw)),+
                }
            }

            fn raw_from_value(value: &$crate::dbus::Value) -> ::std::option::Option<Self::Raw> {
                value.as_str().map(::std::string::String::from)
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $raw_ty:ty {
            $($(#[$variant_meta:meta])* $variant:ident = $raw:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $crate::dbus::WireEnum for $name {
            type Raw = $raw_ty;

            const TYPE_NAME: &'static str = ::std::stringify!($name);

            fn members() -> &'static [Self] {
                &[$(Self::$variant),+]
            }

            fn raw(&self) -> Self::Raw {
                match self {
                    $(Self::$variant => $raw),+
                }
            }

            fn raw_from_value(value: &$crate::dbus::Value) -> ::std::option::Option<Self::Raw> {
                value
                    .as_i64()
                    .and_then(|raw| <$raw_ty as ::std::convert::TryFrom<i64>>::try_from(raw).ok())
            }
        }
    };
}
