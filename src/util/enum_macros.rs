/// Declares an enumeration for a wire code that has a few named values, a
/// proprietary range and everything else reserved.
///
/// Every value of the underlying integer converts to the enum and back without
/// loss, so a decoder never has to reject a code it does not know.
///
/// # Arguments
///
/// * `$name` - the enum to declare; a `[<$name Value>]` wrapper is declared
///   alongside it for the unnamed values.
/// * `$variant = $value` - the named codes, as integer literals.
/// * `$unit` - the integer type on the wire.
/// * `$custom_range` - the proprietary range. Unnamed values inside it become
///   `Custom`, all others `Reserved`.
///
/// # Example
///
/// ```rust
/// use bacnet_mstp::generate_custom_enum;
///
/// generate_custom_enum! {
///     /// Line states reported by a transceiver.
///     LineState {
///         Idle = 0,
///         Busy = 1,
///     },
///     u8,
///     200..=255
/// }
///
/// assert_eq!(LineState::from(1u8), LineState::Busy);
/// assert_eq!(u8::from(LineState::Idle), 0);
/// assert!(LineState::Busy.is_named());
///
/// let vendor = LineState::from(210u8);
/// assert!(matches!(vendor, LineState::Custom(v) if v.value() == 210));
/// assert_eq!(vendor.to_string(), "Custom(210)");
///
/// let unknown = LineState::from(7u8);
/// assert!(matches!(unknown, LineState::Reserved(_)));
/// assert_eq!(u8::from(unknown), 7);
/// ```
#[macro_export]
macro_rules! generate_custom_enum {
    (
        $(#[$doc:meta])*
        $name:ident { $($variant:ident = $value:literal,)+ },
        $unit:ident,
        $custom_range:expr
    ) => {
        pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {
                $($variant,)+
                Custom([<$name Value>]),
                Reserved([<$name Value>]),
            }

            /// Raw value of an unnamed code.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct [<$name Value>]($unit);

            impl [<$name Value>] {
                pub fn value(&self) -> $unit {
                    self.0
                }
            }

            impl $name {
                /// Whether this is one of the named codes.
                pub fn is_named(&self) -> bool {
                    !matches!(self, $name::Custom(_) | $name::Reserved(_))
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)+
                        v if ($custom_range).contains(&v) => $name::Custom([<$name Value>](v)),
                        v => $name::Reserved([<$name Value>](v)),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)+
                        $name::Custom(raw) | $name::Reserved(raw) => raw.value(),
                    }
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self {
                        $($name::$variant => f.write_str(stringify!($variant)),)+
                        $name::Custom(raw) => write!(f, "Custom({})", raw.value()),
                        $name::Reserved(raw) => write!(f, "Reserved({})", raw.value()),
                    }
                }
            }
        }
    };
}
