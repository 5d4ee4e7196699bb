//! Lookup tables built from introspection data.

use std::collections::BTreeMap;

use zbus_xml::{ArgDirection, Node};

use super::DbusError;

/// Whether a property can be read, written or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    /// Read-only.
    Read,
    /// Write-only.
    Write,
    /// Read and write.
    ReadWrite,
}

impl PropertyAccess {
    /// True when the property can be read.
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// True when the property can be written.
    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Signatures of a method's arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodInfo {
    /// Concatenated input signature.
    pub inputs: String,
    /// Concatenated output signature.
    pub outputs: String,
}

/// Type and access of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property signature.
    pub signature: String,
    /// Access mode.
    pub access: PropertyAccess,
}

/// Method, property and signal tables of one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceTable {
    /// Interface name.
    pub name: String,
    /// Methods by name.
    pub methods: BTreeMap<String, MethodInfo>,
    /// Properties by name.
    pub properties: BTreeMap<String, PropertyInfo>,
    /// Signals by name, mapped to their argument signature.
    pub signals: BTreeMap<String, String>,
}

/// Everything introspection reported about one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDescription {
    /// Interfaces by name.
    pub interfaces: BTreeMap<String, InterfaceTable>,
    /// Names of child nodes, relative to the object path.
    pub children: Vec<String>,
}

impl ObjectDescription {
    /// Parses introspection XML.
    ///
    /// # Errors
    /// Returns `DbusError::Parse` if the XML is malformed.
    pub fn parse(xml: &str) -> Result<Self, DbusError> {
        let node = Node::from_reader(xml.as_bytes())
            .map_err(|err| DbusError::Parse(err.to_string()))?;

        let mut interfaces = BTreeMap::new();
        for iface in node.interfaces() {
            let name = iface.name().to_string();

            let methods = iface
                .methods()
                .iter()
                .map(|method| {
                    let mut info = MethodInfo::default();
                    for arg in method.args() {
                        match arg.direction() {
                            Some(ArgDirection::Out) => info.outputs.push_str(&arg.ty().to_string()),
                            _ => info.inputs.push_str(&arg.ty().to_string()),
                        }
                    }
                    (method.name().to_string(), info)
                })
                .collect();

            let properties = iface
                .properties()
                .iter()
                .map(|property| {
                    let access = match (property.access().read(), property.access().write()) {
                        (true, true) => PropertyAccess::ReadWrite,
                        (false, true) => PropertyAccess::Write,
                        _ => PropertyAccess::Read,
                    };
                    (
                        property.name().to_string(),
                        PropertyInfo {
                            signature: property.ty().to_string(),
                            access,
                        },
                    )
                })
                .collect();

            let signals = iface
                .signals()
                .iter()
                .map(|signal| {
                    let signature: String =
                        signal.args().iter().map(|arg| arg.ty().to_string()).collect();
                    (signal.name().to_string(), signature)
                })
                .collect();

            interfaces.insert(
                name.clone(),
                InterfaceTable {
                    name,
                    methods,
                    properties,
                    signals,
                },
            );
        }

        let children = node
            .nodes()
            .iter()
            .filter_map(|child| child.name().map(str::to_owned))
            .collect();

        Ok(Self {
            interfaces,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK_DEVICE: &str = r#"
<node>
  <interface name="org.freedesktop.NetworkManager.Device">
    <method name="Disconnect"/>
    <method name="GetAppliedConnection">
      <arg name="flags" type="u" direction="in"/>
      <arg name="connection" type="a{sa{sv}}" direction="out"/>
      <arg name="version_id" type="t" direction="out"/>
    </method>
    <property name="Interface" type="s" access="read"/>
    <property name="Managed" type="b" access="readwrite"/>
    <signal name="StateChanged">
      <arg name="new_state" type="u"/>
      <arg name="old_state" type="u"/>
      <arg name="reason" type="u"/>
    </signal>
  </interface>
  <interface name="org.freedesktop.NetworkManager.Device.Wireless">
    <method name="RequestScan"/>
  </interface>
  <node name="0"/>
</node>
"#;

    #[test]
    fn builds_tables_per_interface() {
        let description = ObjectDescription::parse(NETWORK_DEVICE).unwrap_or_default();

        assert_eq!(description.interfaces.len(), 2);
        let device = &description.interfaces["org.freedesktop.NetworkManager.Device"];

        assert_eq!(
            device.methods["GetAppliedConnection"],
            MethodInfo {
                inputs: String::from("u"),
                outputs: String::from("a{sa{sv}}t"),
            }
        );
        assert_eq!(device.properties["Interface"].access, PropertyAccess::Read);
        assert!(device.properties["Managed"].access.writable());
        assert_eq!(device.signals["StateChanged"], "uuu");
        assert_eq!(description.children, vec![String::from("0")]);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let result = ObjectDescription::parse("<node><interface name=");
        assert!(matches!(result, Err(DbusError::Parse(_))));
    }
}
