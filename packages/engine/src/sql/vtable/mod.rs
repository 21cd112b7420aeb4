pub(crate) mod internal_state_vtable;
