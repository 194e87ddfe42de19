#[macro_export]
macro_rules! make_id {
    ($name:ident) => {
        /// A dense, never-reused ordinal assigned in registration order.
        #[derive(Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The id handed to the first registered entity.
            pub const FIRST: Self = Self(1);

            pub const fn new(v: u32) -> Self {
                Self(v)
            }

            pub const fn get(self) -> u32 {
                self.0
            }

            /// The id the next registration will receive.
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self, f)
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }
    };
}
