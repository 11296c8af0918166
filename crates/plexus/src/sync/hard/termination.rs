//! Distributed termination detection.
//!
//! A Dijkstra–Scholten-style four-color algorithm (token color × process
//! color) detects global quiescence of the hard-sync servers:
//!
//! - every process holds a color, painted black by any RPC send;
//! - rank 0 starts a round by sending a white token to rank `size - 1`;
//! - a non-root process receiving the token forwards it toward rank 0,
//!   painting it black if the process itself is black, then resets its own
//!   color to white;
//! - rank 0 receiving a white token while itself white broadcasts END and
//!   the epoch toggles everywhere; otherwise it starts a new round.
//!
//! Servers keep answering requests for the whole duration, and outstanding
//! non-blocking sends are drained once the algorithm completes.

use std::rc::Rc;

use plexus_comm::{Communicator, TypedComm};
use plexus_core::error::PlexusError;
use plexus_core::graph::GraphData;

use crate::graph::GraphCore;

use super::enums::{Color, Tag};
use super::server_pack::ServerPack;

pub(crate) struct Termination {
    comm: Rc<dyn Communicator>,
    color_comm: TypedComm<Color>,
}

impl Termination {
    pub(crate) fn new(comm: Rc<dyn Communicator>) -> Self {
        Self {
            color_comm: TypedComm::new(comm.clone()),
            comm,
        }
    }

    /// Run the algorithm until global quiescence, then toggle the server
    /// epoch. Collective; servers stay responsive throughout.
    pub(crate) fn terminate<T: GraphData>(
        &mut self,
        pack: &mut ServerPack<T>,
        core: &mut GraphCore<T>,
    ) -> Result<(), PlexusError> {
        let rank = self.comm.rank();
        let size = self.comm.size();
        tracing::debug!(rank, epoch = ?pack.epoch(), "entering termination");

        if rank == 0 {
            pack.set_color(Color::White);
            self.color_comm
                .send(&Color::White, size - 1, Tag::Token.bits())?;
        }
        let sup_rank = (rank + 1) % size;

        loop {
            // Token from the next rank in the ring.
            if self.comm.iprobe(Some(sup_rank), Tag::Token.bits())?.is_some() {
                let (token, _) = self.color_comm.recv(sup_rank, Tag::Token.bits())?;
                if rank == 0 {
                    if token == Color::White && pack.color() == Color::White {
                        // Leave no message of this round behind before the
                        // epoch toggles.
                        pack.drain_incoming(core)?;
                        for peer in 1..size {
                            self.comm.send(peer, Tag::End.bits(), &[])?;
                        }
                        pack.toggle_epoch();
                        tracing::debug!(rank, epoch = ?pack.epoch(), "termination complete");
                        return Ok(());
                    }
                    // Activity somewhere: start a new round.
                    pack.set_color(Color::White);
                    self.color_comm
                        .send(&Color::White, size - 1, Tag::Token.bits())?;
                } else {
                    let forwarded = if pack.color() == Color::Black {
                        Color::Black
                    } else {
                        token
                    };
                    self.color_comm
                        .send(&forwarded, rank - 1, Tag::Token.bits())?;
                    pack.set_color(Color::White);
                }
            }

            // END from the root.
            if rank > 0 && self.comm.iprobe(Some(0), Tag::End.bits())?.is_some() {
                self.comm.recv(0, Tag::End.bits())?;
                pack.drain_incoming(core)?;
                pack.toggle_epoch();
                tracing::debug!(rank, epoch = ?pack.epoch(), "termination complete");
                return Ok(());
            }

            pack.handle_incoming(core)?;
        }
    }
}
