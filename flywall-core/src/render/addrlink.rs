//! Address/link artifact: the `Vec<AddrLinkOp>` executed via `rtnetlink`
//! rather than a subprocess, since there is no `ip -f` batch file format.

use crate::model::config::Config;

#[derive(Clone, Debug, PartialEq)]
pub enum AddrLinkOp {
    SetAddr { interface: String, cidr: String },
    DelAddr { interface: String, cidr: String },
    SetMtu { interface: String, mtu: u32 },
    LinkUp { interface: String },
    LinkDown { interface: String },
}

/// One operation set per non-disabled interface. Disabled interfaces
/// contribute no ops — their addresses and link state are left as found.
pub fn render_addrlink(config: &Config) -> Vec<AddrLinkOp> {
    let mut ops = Vec::new();

    for iface in &config.interfaces {
        if iface.disabled {
            ops.push(AddrLinkOp::LinkDown {
                interface: iface.name.to_string(),
            });
            continue;
        }

        ops.push(AddrLinkOp::LinkUp {
            interface: iface.name.to_string(),
        });

        if let Some(mtu) = iface.mtu {
            ops.push(AddrLinkOp::SetMtu {
                interface: iface.name.to_string(),
                mtu,
            });
        }

        if !iface.dhcp {
            for cidr in iface.ipv4.iter().chain(iface.ipv6.iter()) {
                ops.push(AddrLinkOp::SetAddr {
                    interface: iface.name.to_string(),
                    cidr: cidr.clone(),
                });
            }
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::InterfaceName;
    use crate::model::config::SchemaVersion;
    use crate::model::interface::Interface;

    fn base() -> Config {
        Config {
            schema_version: SchemaVersion("1.2".to_string()),
            ip_forwarding: true,
            mss_clamping: false,
            enable_flow_offload: false,
            state_dir: "/var/lib/flywall".to_string(),
            zones: Vec::new(),
            interfaces: Vec::new(),
            policies: Vec::new(),
            nats: Vec::new(),
            qos_policies: Vec::new(),
            dhcp: Vec::new(),
            dns: None,
            mdns: None,
            ebpf: None,
            web: None,
            api: Vec::new(),
            syslog: None,
        }
    }

    #[test]
    fn disabled_interface_only_gets_link_down() {
        let mut config = base();
        config.interfaces.push(Interface {
            name: InterfaceName::new("eth1"),
            zone: None,
            ipv4: vec!["10.0.0.1/24".to_string()],
            ipv6: Vec::new(),
            dhcp: false,
            disabled: true,
            mtu: None,
        });
        let ops = render_addrlink(&config);
        assert_eq!(ops, vec![AddrLinkOp::LinkDown { interface: "eth1".to_string() }]);
    }

    #[test]
    fn dhcp_interface_gets_no_static_addr_ops() {
        let mut config = base();
        config.interfaces.push(Interface {
            name: InterfaceName::new("eth0"),
            zone: None,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            dhcp: true,
            disabled: false,
            mtu: None,
        });
        let ops = render_addrlink(&config);
        assert_eq!(ops, vec![AddrLinkOp::LinkUp { interface: "eth0".to_string() }]);
    }

    #[test]
    fn static_interface_gets_addr_and_mtu_ops() {
        let mut config = base();
        config.interfaces.push(Interface {
            name: InterfaceName::new("eth0"),
            zone: None,
            ipv4: vec!["192.168.1.1/24".to_string()],
            ipv6: Vec::new(),
            dhcp: false,
            disabled: false,
            mtu: Some(1500),
        });
        let ops = render_addrlink(&config);
        assert_eq!(
            ops,
            vec![
                AddrLinkOp::LinkUp { interface: "eth0".to_string() },
                AddrLinkOp::SetMtu { interface: "eth0".to_string(), mtu: 1500 },
                AddrLinkOp::SetAddr { interface: "eth0".to_string(), cidr: "192.168.1.1/24".to_string() },
            ]
        );
    }
}
