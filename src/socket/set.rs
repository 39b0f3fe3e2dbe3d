use super::{Socket, SocketHandle};

/// The fixed-width socket registry: one slot per firmware mux.
///
/// Slots are overwritten, never "freed" — binding a mux that is already
/// occupied orphans the previous occupant, which matches how the firmware
/// treats its connection identifiers.
#[derive(Debug)]
pub struct SocketSet<const N: usize> {
    slots: [Option<Socket>; N],
}

impl<const N: usize> SocketSet<N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Claim a slot for a fresh socket and return its handle.
    ///
    /// An out-of-range request is wrapped modulo the slot count rather than
    /// rejected — the firmware's mux width is fixed and its tooling silently
    /// remaps, so we stay bind-compatible. Surprising, but deliberate.
    pub fn bind(&mut self, requested: usize) -> SocketHandle {
        let mux = requested % N;
        let handle = SocketHandle(mux);
        self.slots[mux] = Some(Socket::new(handle));
        handle
    }

    /// Move a socket to the mux the firmware actually granted, vacating the
    /// requested slot. Some firmware families pick their own identifier on
    /// open.
    pub fn rebind(&mut self, from: SocketHandle, granted: usize) -> SocketHandle {
        let granted = granted % N;
        if granted == from.0 {
            return from;
        }
        warn!("mux changed from {} to {}", from.0, granted);
        let handle = SocketHandle(granted);
        match self.slots[from.0].take() {
            Some(mut socket) => {
                socket.handle = handle;
                self.slots[granted] = Some(socket);
            }
            None => {
                self.slots[granted] = Some(Socket::new(handle));
            }
        }
        handle
    }

    pub fn get(&self, handle: SocketHandle) -> Option<&Socket> {
        self.slots.get(handle.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Option<&mut Socket> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    pub fn remove(&mut self, handle: SocketHandle) -> Option<Socket> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.take())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Socket> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }
}

impl<const N: usize> Default for SocketSet<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_bind_wraps_modulo_slot_count() {
        // Documented surprising default: the request is remapped, not
        // rejected, to stay compatible with the firmware's fixed mux width.
        let mut set: SocketSet<2> = SocketSet::new();

        assert_eq!(set.bind(5), SocketHandle(1));
        assert_eq!(set.bind(5), SocketHandle(1));
        assert_eq!(set.bind(2), SocketHandle(0));
    }

    #[test]
    fn rebinding_an_occupied_slot_orphans_the_previous_socket() {
        let mut set: SocketSet<2> = SocketSet::new();

        let first = set.bind(1);
        set.get_mut(first).unwrap().available = 17;

        let second = set.bind(1);
        assert_eq!(first, second);
        // The slot now holds the fresh socket only.
        assert_eq!(set.get(second).unwrap().available, 0);
    }

    #[test]
    fn rebind_moves_state_and_vacates_the_old_slot() {
        let mut set: SocketSet<4> = SocketSet::new();

        let handle = set.bind(0);
        set.get_mut(handle).unwrap().connected = true;

        let granted = set.rebind(handle, 2);
        assert_eq!(granted, SocketHandle(2));
        assert!(set.get(handle).is_none());
        assert!(set.get(granted).unwrap().connected);
    }
}
