//! Server proxy
//!
//! A [`Server`] connects a [`ServerHandler`] to a [`CasEngine`]. The engine
//! only keeps a weak reference to the proxy, so dropping the `Server` stops
//! name resolution for its PVs.

use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::engine::{CaNetAddr, CaServer, CaStatus, CasCtx, CasEngine, PvAttachReturn, PvExistReturn};
use crate::error::{HandlerResult, Result};
use crate::host::diagnostics::write_unraisable;
use crate::host::{HostGuard, HostValue};

use super::reenter;
use super::symbols::{AttachResponse, ExistsResponse, HostEnum};

/// Address of the client asking about a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientAddress {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl From<&CaNetAddr> for ClientAddress {
    fn from(addr: &CaNetAddr) -> Self {
        Self {
            host: addr.host(),
            port: addr.port(),
        }
    }
}

/// Name resolution for a server. The defaults know no PVs.
pub trait ServerHandler: Send + Sync {
    /// An `ExistsResponse` for `pv_name`.
    fn pv_exist_test(&self, client: &ClientAddress, pv_name: &str) -> HandlerResult<HostValue> {
        let _ = (client, pv_name);
        Ok(ExistsResponse::NotExistsHere.to_host())
    }

    /// The [`Pv`](super::Pv) to serve for `pv_name`, or an `AttachResponse`.
    fn pv_attach(&self, pv_name: &str) -> HandlerResult<HostValue> {
        let _ = pv_name;
        Ok(AttachResponse::NotFound.to_host())
    }
}

const SERVER_OBJECT: &str = "Server";

struct ServerProxy {
    handler: Arc<dyn ServerHandler>,
    engine: Weak<CasEngine>,
}

impl CaServer for ServerProxy {
    fn pv_exist_test(&self, _ctx: &CasCtx, client: &CaNetAddr, pv_name: &str) -> PvExistReturn {
        let address = ClientAddress::from(client);
        let answer = match reenter(|| self.handler.pv_exist_test(&address, pv_name)) {
            Ok(answer) => answer,
            Err(err) => {
                write_unraisable("Server.pvExistTest", SERVER_OBJECT, &err);
                return PvExistReturn::DoesNotExistHere;
            }
        };
        match ExistsResponse::from_host(&answer) {
            Ok(response) => response.into(),
            Err(err) => {
                write_unraisable("Server.pvExistTest", SERVER_OBJECT, &err);
                PvExistReturn::DoesNotExistHere
            }
        }
    }

    fn pv_attach(&self, _ctx: &CasCtx, pv_name: &str) -> PvAttachReturn {
        let answer = match reenter(|| self.handler.pv_attach(pv_name)) {
            Ok(answer) => answer,
            Err(err) => {
                write_unraisable("Server.pvAttach", SERVER_OBJECT, &err);
                return PvAttachReturn::Status(CaStatus::PvNotFound);
            }
        };
        match answer {
            HostValue::Pv(pv) => {
                pv.bind_engine(self.engine.clone());
                debug!(requested = pv_name, pv = pv.name(), "Attaching PV");
                PvAttachReturn::Pv(pv.give_to_server())
            }
            HostValue::None => PvAttachReturn::Status(CaStatus::PvNotFound),
            other => match AttachResponse::from_host(&other) {
                Ok(response) => PvAttachReturn::Status(response.into()),
                Err(err) => {
                    write_unraisable("Server.pvAttach", SERVER_OBJECT, &err);
                    PvAttachReturn::Status(CaStatus::PvNotFound)
                }
            },
        }
    }
}

/// A server application bound to one engine.
pub struct Server {
    proxy: Arc<ServerProxy>,
    engine: Arc<CasEngine>,
}

impl Server {
    pub fn new(engine: &Arc<CasEngine>, handler: Arc<dyn ServerHandler>) -> Self {
        let proxy = Arc::new(ServerProxy {
            handler,
            engine: Arc::downgrade(engine),
        });
        let installed: Weak<dyn CaServer> = Arc::downgrade(&proxy) as Weak<dyn CaServer>;
        engine.install_server(installed);
        info!("Server installed");
        Self {
            proxy,
            engine: engine.clone(),
        }
    }

    pub fn engine(&self) -> &Arc<CasEngine> {
        &self.engine
    }

    pub fn handler(&self) -> &Arc<dyn ServerHandler> {
        &self.proxy.handler
    }

    /// The engine-facing proxy.
    pub fn proxy(&self) -> Arc<dyn CaServer> {
        self.proxy.clone()
    }

    /// Drive the engine for up to `timeout_secs`, see [`super::process`].
    pub fn process(&self, guard: &mut HostGuard, timeout_secs: f64) -> Result<usize> {
        super::process(guard, &self.engine, timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::pv::{Pv, PvHandler};
    use crate::engine::CompletionSender;
    use crate::error::HandlerError;
    use crate::host::diagnostics::capture;

    struct Inert;
    impl PvHandler for Inert {}

    struct OneName {
        pv: Pv,
    }

    impl ServerHandler for OneName {
        fn pv_exist_test(&self, client: &ClientAddress, pv_name: &str) -> HandlerResult<HostValue> {
            assert_eq!(client.port, 5064);
            Ok(if pv_name == self.pv.name() {
                ExistsResponse::ExistsHere.to_host()
            } else {
                HostValue::Str("maybe".into())
            })
        }

        fn pv_attach(&self, pv_name: &str) -> HandlerResult<HostValue> {
            match pv_name {
                "MEM:PV" => Ok(AttachResponse::NoMemory.to_host()),
                "ERR:PV" => Err(HandlerError::raised("attach failed")),
                name if name == self.pv.name() => Ok(self.pv.clone().into()),
                _ => Ok(AttachResponse::NotFound.to_host()),
            }
        }
    }

    fn ctx() -> CasCtx {
        let (tx, _rx) = crossbeam_channel::unbounded();
        CasCtx::new(1, CompletionSender::new(tx))
    }

    fn client() -> CaNetAddr {
        CaNetAddr::new(Ipv4Addr::new(10, 0, 0, 1), 5064)
    }

    #[test]
    fn test_exist_test_maps_answers() {
        let engine = CasEngine::new();
        let pv = Pv::new("HERE:PV", Arc::new(Inert)).unwrap();
        let server = Server::new(&engine, Arc::new(OneName { pv }));
        let proxy = server.proxy();

        assert_eq!(proxy.pv_exist_test(&ctx(), &client(), "HERE:PV"), PvExistReturn::ExistsHere);
        let (answer, reports) = capture(|| proxy.pv_exist_test(&ctx(), &client(), "ELSEWHERE"));
        assert_eq!(answer, PvExistReturn::DoesNotExistHere);
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_attach_maps_answers() {
        let engine = CasEngine::new();
        let pv = Pv::new("HERE:PV", Arc::new(Inert)).unwrap();
        let server = Server::new(&engine, Arc::new(OneName { pv: pv.clone() }));
        let proxy = server.proxy();

        match proxy.pv_attach(&ctx(), "HERE:PV") {
            PvAttachReturn::Pv(attached) => assert_eq!(attached.get_name(), "HERE:PV"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(pv.is_registered());
        assert!(pv.engine().is_some());

        assert!(matches!(
            proxy.pv_attach(&ctx(), "missing:pv"),
            PvAttachReturn::Status(CaStatus::PvNotFound)
        ));
        assert!(matches!(
            proxy.pv_attach(&ctx(), "MEM:PV"),
            PvAttachReturn::Status(CaStatus::NoMemory)
        ));
        let (answer, reports) = capture(|| proxy.pv_attach(&ctx(), "ERR:PV"));
        assert!(matches!(answer, PvAttachReturn::Status(CaStatus::PvNotFound)));
        assert_eq!(reports[0].origin, "Server.pvAttach");
    }

    #[test]
    fn test_default_handler_knows_nothing() {
        struct Empty;
        impl ServerHandler for Empty {}

        let engine = CasEngine::new();
        let server = Server::new(&engine, Arc::new(Empty));
        let proxy = server.proxy();
        assert_eq!(proxy.pv_exist_test(&ctx(), &client(), "ANY"), PvExistReturn::DoesNotExistHere);
        assert!(matches!(
            proxy.pv_attach(&ctx(), "ANY"),
            PvAttachReturn::Status(CaStatus::PvNotFound)
        ));
    }
}
