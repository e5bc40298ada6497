pub mod svdapprox;
