pub mod invoice_sweep;
