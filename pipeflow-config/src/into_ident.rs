use crate::{ident::Ident, port_addr::PortAddr};
use std::str::FromStr;

/// Provide the conversion to [Ident] on the implemented type.
///
/// String conversions panic on invalid names. They are meant for
/// names written in code, not for user input.
pub trait IntoIdent {
    fn into(self) -> Ident;
}

impl IntoIdent for String {
    fn into(self) -> Ident {
        Ident::new(&self).unwrap_or_else(|| panic!("invalid identifier '{}'", self))
    }
}

impl IntoIdent for &String {
    fn into(self) -> Ident {
        Ident::new(self).unwrap_or_else(|| panic!("invalid identifier '{}'", self))
    }
}

impl IntoIdent for &str {
    fn into(self) -> Ident {
        Ident::new(self).unwrap_or_else(|| panic!("invalid identifier '{}'", self))
    }
}

impl IntoIdent for Ident {
    fn into(self) -> Ident {
        self
    }
}

impl IntoIdent for &Ident {
    fn into(self) -> Ident {
        self.clone()
    }
}

/// Provide the conversion to [PortAddr] on the implemented type.
pub trait IntoPortAddr {
    fn into(self) -> PortAddr;
}

impl IntoPortAddr for &str {
    fn into(self) -> PortAddr {
        PortAddr::from_str(self).unwrap_or_else(|err| panic!("{}", err))
    }
}

impl IntoPortAddr for String {
    fn into(self) -> PortAddr {
        IntoPortAddr::into(self.as_str())
    }
}

impl IntoPortAddr for PortAddr {
    fn into(self) -> PortAddr {
        self
    }
}

impl IntoPortAddr for &PortAddr {
    fn into(self) -> PortAddr {
        self.clone()
    }
}
